//! Definición de tarea: el contrato con el parser de grafo externo.
//!
//! El parser (fuera de este repo) entrega por cada tarea sus recurrencias,
//! sus hijos downstream por output, sus padres con offset y los offsets
//! especiales (expiración, trigger de reloj, máximo offset futuro). El pool
//! sólo lee estas estructuras; nunca las muta. `TaskDefBuilder` existe para
//! tests y demos que arman grafos a mano.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use ciclo_cycling::{CycleInterval, CyclePoint, CycleSequence};

use crate::outputs::TaskOutputs;

/// Hijo downstream de un output: al completarse el output del padre en el
/// punto P, el hijo se engendra en `P + offset` (o en todo punto si el
/// output es absoluto).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphChild {
    pub name: String,
    pub offset: Option<CycleInterval>,
    pub is_absolute: bool,
}

/// Padre upstream de una tarea: condición `(padre, output)` con offset
/// relativo al punto del hijo. `suicide` marca prerequisitos de suicidio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphParent {
    pub name: String,
    pub offset: Option<CycleInterval>,
    pub output: String,
    pub is_absolute: bool,
    /// Punto fijo del padre para triggers absolutos; None = punto inicial
    /// del workflow.
    pub abs_point: Option<CyclePoint>,
    pub suicide: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    pub sequences: Vec<CycleSequence>,
    /// `output label → hijos` que engendra ese output.
    pub graph_children: IndexMap<String, Vec<GraphChild>>,
    pub graph_parents: Vec<GraphParent>,
    /// Outputs de usuario: `(label, mensaje, requerido)`.
    pub custom_outputs: Vec<(String, String, bool)>,
    /// Máximo offset con el que otra tarea futura depende de ésta; eleva el
    /// límite de runahead.
    pub max_future_prereq_offset: Option<CycleInterval>,
    pub expiration_offset: Option<CycleInterval>,
    pub clock_trigger_offset: Option<CycleInterval>,
    pub external_triggers: Vec<String>,
    /// Cola asignada por configuración; None = cola default.
    pub queue: Option<String>,
}

impl TaskDef {
    /// ¿La tarea no tiene padres en este punto? Las tareas sin padres se
    /// engendran ansiosamente hasta el límite de runahead.
    pub fn is_parentless(&self, point: &CyclePoint) -> bool {
        self.is_valid_point(point) && self.graph_parents.iter().all(|p| p.suicide)
    }

    pub fn is_valid_point(&self, point: &CyclePoint) -> bool {
        self.sequences.iter().any(|s| s.is_valid(point))
    }

    /// Primer punto válido `>= from` entre todas las recurrencias.
    pub fn first_point(&self, from: &CyclePoint) -> Option<CyclePoint> {
        self.sequences.iter().filter_map(|s| s.first_point(from)).min()
    }

    /// Primer punto válido estrictamente posterior a `after`.
    pub fn next_point(&self, after: &CyclePoint) -> Option<CyclePoint> {
        self.sequences.iter().filter_map(|s| s.next_point(after)).min()
    }

    pub fn has_abs_triggers(&self) -> bool {
        self.graph_parents.iter().any(|p| p.is_absolute)
    }

    /// Outputs iniciales de una instancia nueva: los estándar más los de
    /// usuario declarados en la definición.
    pub fn initial_outputs(&self) -> TaskOutputs {
        let mut outs = TaskOutputs::standard();
        for (label, message, required) in &self.custom_outputs {
            outs.add_output(label, message, *required);
        }
        outs
    }

    pub fn children_of(&self, output: &str) -> &[GraphChild] {
        self.graph_children.get(output).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Builder fluido para armar definiciones en tests y demos.
#[derive(Debug, Clone)]
pub struct TaskDefBuilder {
    def: TaskDef,
}

impl TaskDefBuilder {
    pub fn new(name: &str) -> Self {
        Self { def: TaskDef { name: name.to_string(),
                              sequences: Vec::new(),
                              graph_children: IndexMap::new(),
                              graph_parents: Vec::new(),
                              custom_outputs: Vec::new(),
                              max_future_prereq_offset: None,
                              expiration_offset: None,
                              clock_trigger_offset: None,
                              external_triggers: Vec::new(),
                              queue: None } }
    }

    pub fn on_sequence(mut self, sequence: CycleSequence) -> Self {
        self.def.sequences.push(sequence);
        self
    }

    /// Declara que `output` engendra al hijo `child` (mismo punto si
    /// `offset` es None).
    pub fn spawns(mut self, output: &str, child: &str, offset: Option<CycleInterval>) -> Self {
        self.def
            .graph_children
            .entry(output.to_string())
            .or_default()
            .push(GraphChild { name: child.to_string(),
                               offset,
                               is_absolute: false });
        self
    }

    pub fn spawns_absolute(mut self, output: &str, child: &str) -> Self {
        self.def
            .graph_children
            .entry(output.to_string())
            .or_default()
            .push(GraphChild { name: child.to_string(),
                               offset: None,
                               is_absolute: true });
        self
    }

    pub fn depends_on(mut self, parent: &str, output: &str, offset: Option<CycleInterval>) -> Self {
        self.def.graph_parents.push(GraphParent { name: parent.to_string(),
                                                  offset,
                                                  output: output.to_string(),
                                                  is_absolute: false,
                                                  abs_point: None,
                                                  suicide: false });
        self
    }

    pub fn depends_on_absolute(mut self, parent: &str, output: &str, abs_point: Option<CyclePoint>) -> Self {
        self.def.graph_parents.push(GraphParent { name: parent.to_string(),
                                                  offset: None,
                                                  output: output.to_string(),
                                                  is_absolute: true,
                                                  abs_point,
                                                  suicide: false });
        self
    }

    pub fn suicides_on(mut self, parent: &str, output: &str, offset: Option<CycleInterval>) -> Self {
        self.def.graph_parents.push(GraphParent { name: parent.to_string(),
                                                  offset,
                                                  output: output.to_string(),
                                                  is_absolute: false,
                                                  abs_point: None,
                                                  suicide: true });
        self
    }

    pub fn with_output(mut self, label: &str, message: &str, required: bool) -> Self {
        self.def.custom_outputs.push((label.to_string(), message.to_string(), required));
        self
    }

    pub fn with_max_future_offset(mut self, offset: CycleInterval) -> Self {
        self.def.max_future_prereq_offset = Some(offset);
        self
    }

    pub fn expires_after(mut self, offset: CycleInterval) -> Self {
        self.def.expiration_offset = Some(offset);
        self
    }

    pub fn with_clock_trigger(mut self, offset: CycleInterval) -> Self {
        self.def.clock_trigger_offset = Some(offset);
        self
    }

    pub fn with_external_trigger(mut self, label: &str) -> Self {
        self.def.external_triggers.push(label.to_string());
        self
    }

    pub fn in_queue(mut self, queue: &str) -> Self {
        self.def.queue = Some(queue.to_string());
        self
    }

    pub fn build(self) -> TaskDef {
        self.def
    }
}
