//! Prerequisitos: condiciones `(punto, tarea, output)` con bandera de
//! satisfacción tri-estado.
//!
//! Un prerequisito agrupa una conjunción de condiciones; la instancia pasa
//! del pool oculto al principal cuando todas sus condiciones quedan
//! satisfechas. La forma textual del estado es el contrato con la tabla
//! `task_prerequisites` (`"satisfied naturally"`, `"force satisfied"`, `"0"`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use ciclo_cycling::CyclePoint;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrereqKey {
    pub point: CyclePoint,
    pub name: String,
    pub output: String,
}

impl PrereqKey {
    pub fn new(point: CyclePoint, name: &str, output: &str) -> Self {
        Self { point,
               name: name.to_string(),
               output: output.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrereqState {
    Unsatisfied,
    /// Satisfecho por un output real del upstream.
    Satisfied,
    /// Satisfecho a mano (set-outputs / trigger forzado).
    ForceSatisfied,
}

impl PrereqState {
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, PrereqState::Unsatisfied)
    }

    /// Forma persistida en `task_prerequisites.satisfied`.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PrereqState::Unsatisfied => "0",
            PrereqState::Satisfied => "satisfied naturally",
            PrereqState::ForceSatisfied => "force satisfied",
        }
    }

    pub fn from_db_str(value: &str) -> PrereqState {
        match value {
            "satisfied naturally" => PrereqState::Satisfied,
            "force satisfied" => PrereqState::ForceSatisfied,
            _ => PrereqState::Unsatisfied,
        }
    }
}

/// Conjunción de condiciones sobre outputs de otras instancias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    conditions: IndexMap<PrereqKey, PrereqState>,
}

impl Prerequisite {
    pub fn new(keys: impl IntoIterator<Item = PrereqKey>) -> Self {
        let conditions = keys.into_iter().map(|k| (k, PrereqState::Unsatisfied)).collect();
        Self { conditions }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn is_satisfied(&self) -> bool {
        self.conditions.values().all(|s| s.is_satisfied())
    }

    /// Intenta satisfacer la condición que coincida con el output dado.
    /// Devuelve true si alguna condición cambió de estado.
    pub fn satisfy(&mut self, point: &CyclePoint, name: &str, output: &str, forced: bool) -> bool {
        let mut changed = false;
        for (key, state) in self.conditions.iter_mut() {
            if key.name == name && key.output == output && key.point == *point && !state.is_satisfied() {
                *state = if forced {
                    PrereqState::ForceSatisfied
                } else {
                    PrereqState::Satisfied
                };
                changed = true;
            }
        }
        changed
    }

    /// Igual que `satisfy` pero ignorando el punto: outputs absolutos
    /// satisfacen la condición en toda instancia downstream.
    pub fn satisfy_any_point(&mut self, name: &str, output: &str) -> bool {
        let mut changed = false;
        for (key, state) in self.conditions.iter_mut() {
            if key.name == name && key.output == output && !state.is_satisfied() {
                *state = PrereqState::Satisfied;
                changed = true;
            }
        }
        changed
    }

    /// Sobrescribe el estado de una condición por clave exacta (replay desde
    /// la base de datos en el restart). Claves desconocidas se ignoran.
    pub fn set_state(&mut self, key: &PrereqKey, state: PrereqState) -> bool {
        match self.conditions.get_mut(key) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    pub fn unsatisfied_keys(&self) -> Vec<&PrereqKey> {
        self.conditions
            .iter()
            .filter(|(_, s)| !s.is_satisfied())
            .map(|(k, _)| k)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrereqKey, &PrereqState)> {
        self.conditions.iter()
    }

    /// Fuerza todas las condiciones a satisfechas (modo flow-none / merge).
    pub fn force_satisfy_all(&mut self) {
        for state in self.conditions.values_mut() {
            if !state.is_satisfied() {
                *state = PrereqState::ForceSatisfied;
            }
        }
    }
}
