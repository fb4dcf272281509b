//! Outputs de una instancia de tarea: `label → (mensaje, completado)`.
//!
//! Los labels estándar siguen el ciclo de vida (`submitted`, `started`,
//! `succeeded`, `failed`, `expired`); los outputs de usuario son arbitrarios.
//! Invariante: un output completado no vuelve a incompleto salvo reset
//! explícito del llamador.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OUT_SUBMITTED: &str = "submitted";
pub const OUT_STARTED: &str = "started";
pub const OUT_SUCCEEDED: &str = "succeeded";
pub const OUT_FAILED: &str = "failed";
pub const OUT_EXPIRED: &str = "expired";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub message: String,
    pub required: bool,
    pub completed: bool,
}

/// Conjunto ordenado de outputs de una instancia. El orden de inserción se
/// conserva para que los dumps a base de datos sean estables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutputs {
    slots: IndexMap<String, OutputSlot>,
}

impl TaskOutputs {
    /// Outputs estándar de un ciclo de vida: success es requerido, el resto
    /// opcional. Los outputs de usuario se agregan con `add_output`.
    pub fn standard() -> Self {
        let mut outs = TaskOutputs::default();
        outs.add_output(OUT_SUBMITTED, OUT_SUBMITTED, false);
        outs.add_output(OUT_STARTED, OUT_STARTED, false);
        outs.add_output(OUT_SUCCEEDED, OUT_SUCCEEDED, true);
        outs.add_output(OUT_FAILED, OUT_FAILED, false);
        outs.add_output(OUT_EXPIRED, OUT_EXPIRED, false);
        outs
    }

    pub fn add_output(&mut self, label: &str, message: &str, required: bool) {
        self.slots.entry(label.to_string())
                  .or_insert(OutputSlot { message: message.to_string(),
                                          required,
                                          completed: false });
    }

    pub fn has_output(&self, label: &str) -> bool {
        self.slots.contains_key(label)
    }

    /// Marca un output como completado. Devuelve true si cambió.
    pub fn set_completed(&mut self, label: &str) -> bool {
        match self.slots.get_mut(label) {
            Some(slot) if !slot.completed => {
                slot.completed = true;
                true
            }
            _ => false,
        }
    }

    /// Marca como completado el output cuyo mensaje coincide (replay de
    /// mensajes persistidos en el restart). Devuelve el label si lo hubo.
    pub fn set_completed_by_message(&mut self, message: &str) -> Option<String> {
        for (label, slot) in self.slots.iter_mut() {
            if slot.message == message {
                slot.completed = true;
                return Some(label.clone());
            }
        }
        None
    }

    /// Reset explícito a no-completado (comando reset-to-waiting).
    pub fn reset(&mut self, label: &str) -> bool {
        match self.slots.get_mut(label) {
            Some(slot) if slot.completed => {
                slot.completed = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_completed(&self, label: &str) -> bool {
        self.slots.get(label).map(|s| s.completed).unwrap_or(false)
    }

    /// ¿Están completados todos los outputs requeridos?
    pub fn is_complete(&self) -> bool {
        self.slots.values().all(|s| !s.required || s.completed)
    }

    /// Labels requeridos aún no completados, para el log de stall.
    pub fn incomplete_labels(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, s)| s.required && !s.completed)
            .map(|(l, _)| l.clone())
            .collect()
    }

    pub fn completed_labels(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, s)| s.completed)
            .map(|(l, _)| l.clone())
            .collect()
    }

    /// Mapa JSON `{label: mensaje}` de los outputs completados, como se
    /// persiste en `task_outputs`.
    pub fn completed_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (label, slot) in &self.slots {
            if slot.completed {
                map.insert(label.clone(), Value::String(slot.message.clone()));
            }
        }
        Value::Object(map)
    }

    pub fn message_for(&self, label: &str) -> Option<&str> {
        self.slots.get(label).map(|s| s.message.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutputSlot)> {
        self.slots.iter()
    }
}
