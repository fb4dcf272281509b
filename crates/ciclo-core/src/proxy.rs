//! Instancia viva de una tarea en el pool.
//!
//! Un `TaskProxy` junta la definición (compartida, inmutable) con el estado
//! mutable de una instancia: status, banderas, prerequisitos, outputs,
//! timers y metadatos del último job. La identidad dentro del pool es
//! `punto/nombre`; la unicidad por `(nombre, punto, flows)` la garantiza la
//! lógica de spawn/merge, no este tipo.

use indexmap::IndexMap;
use std::sync::Arc;

use ciclo_cycling::CyclePoint;
use ciclo_domain::{serialise_flow_nums, FlowNums, PrereqKey, Prerequisite, TaskDef, TaskOutputs, TaskStatus};

use crate::util::now_time_string;

#[derive(Debug, Clone)]
pub struct TaskProxy {
    pub tdef: Arc<TaskDef>,
    pub point: CyclePoint,
    pub flow_nums: FlowNums,
    pub submit_num: i64,
    pub status: TaskStatus,
    pub is_held: bool,
    pub is_queued: bool,
    pub is_runahead: bool,
    pub is_manual_submit: bool,
    pub flow_wait: bool,
    pub is_late: bool,
    pub waiting_on_job_prep: bool,
    /// El kill del job falló: la tarea no bloquea un stop ordenado.
    pub kill_failed: bool,
    pub prerequisites: Prerequisite,
    pub suicide_prerequisites: Prerequisite,
    pub outputs: TaskOutputs,
    /// Triggers externos pendientes: `label → satisfecho`.
    pub external_triggers: IndexMap<String, bool>,
    pub try_num: i64,
    pub platform: Option<String>,
    pub time_created: String,
    pub time_updated: Option<String>,
    pub time_submit: Option<String>,
    pub time_run: Option<String>,
    /// Deadline de ejecución/submission (epoch), persistido en
    /// `task_timeout_timers`.
    pub timeout: Option<f64>,
    /// Instante de expiración calculado (epoch), si la definición tiene
    /// offset de expiración.
    pub expire_time: Option<i64>,
}

impl TaskProxy {
    /// Construye una instancia nueva en estado waiting + runahead.
    ///
    /// `abs_default_point` es el punto que asumen los triggers absolutos sin
    /// punto explícito (normalmente el punto inicial del workflow).
    pub fn new(tdef: Arc<TaskDef>,
               point: CyclePoint,
               flow_nums: FlowNums,
               submit_num: i64,
               is_manual_submit: bool,
               flow_wait: bool,
               abs_default_point: &CyclePoint)
               -> Self {
        let mut prereq_keys = Vec::new();
        let mut suicide_keys = Vec::new();
        for parent in &tdef.graph_parents {
            let parent_point = if parent.is_absolute {
                parent.abs_point.clone().unwrap_or_else(|| abs_default_point.clone())
            } else {
                match &parent.offset {
                    Some(offset) => match point.add(offset) {
                        Ok(p) => p,
                        Err(_) => continue,
                    },
                    None => point.clone(),
                }
            };
            // Dependencias anteriores al punto inicial no existen.
            if parent_point < *abs_default_point && !parent.is_absolute {
                continue;
            }
            let key = PrereqKey::new(parent_point, &parent.name, &parent.output);
            if parent.suicide {
                suicide_keys.push(key);
            } else {
                prereq_keys.push(key);
            }
        }
        let external_triggers = tdef.external_triggers
                                    .iter()
                                    .map(|label| (label.clone(), false))
                                    .collect();
        let outputs = tdef.initial_outputs();
        Self { point,
               flow_nums,
               submit_num,
               status: TaskStatus::Waiting,
               is_held: false,
               is_queued: false,
               is_runahead: true,
               is_manual_submit,
               flow_wait,
               is_late: false,
               waiting_on_job_prep: false,
               kill_failed: false,
               prerequisites: Prerequisite::new(prereq_keys),
               suicide_prerequisites: Prerequisite::new(suicide_keys),
               outputs,
               external_triggers,
               try_num: 1,
               platform: None,
               time_created: now_time_string(),
               time_updated: None,
               time_submit: None,
               time_run: None,
               timeout: None,
               expire_time: None,
               tdef }
    }

    /// Identidad en el pool: `punto/nombre`.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.point, self.tdef.name)
    }

    pub fn name(&self) -> &str {
        &self.tdef.name
    }

    pub fn flow_nums_str(&self) -> String {
        serialise_flow_nums(&self.flow_nums)
    }

    /// Cambio de estado con touch de `time_updated`. Devuelve true si
    /// cambió.
    pub fn state_reset(&mut self, status: TaskStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.time_updated = Some(now_time_string());
        true
    }

    pub fn prereqs_all_satisfied(&self) -> bool {
        self.prerequisites.is_satisfied()
    }

    pub fn suicide_ready(&self) -> bool {
        !self.suicide_prerequisites.is_empty() && self.suicide_prerequisites.is_satisfied()
    }

    pub fn external_triggers_satisfied(&self) -> bool {
        self.external_triggers.values().all(|v| *v)
    }

    /// ¿Lista para pasar a la cola? (waiting, sin hold, fuera de runahead,
    /// prerequisitos y triggers externos satisfechos)
    pub fn is_ready_to_run(&self) -> bool {
        self.status == TaskStatus::Waiting
        && !self.is_held
        && !self.is_runahead
        && self.prereqs_all_satisfied()
        && self.external_triggers_satisfied()
    }

    /// Inacabada para el governor de runahead: estado no final, u outputs
    /// requeridos incompletos (cláusula suprimida en modo back-compat).
    pub fn is_unfinished(&self, back_compat: bool) -> bool {
        if !self.status.is_final() {
            return true;
        }
        !back_compat && !self.outputs.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.outputs.is_complete()
    }

    pub fn merge_flow_nums(&mut self, other: &FlowNums) {
        self.flow_nums.extend(other.iter().copied());
    }

    /// Puntos objetivo de los prerequisitos (para la advertencia de
    /// dependencias más allá del stop point).
    pub fn prereq_target_points(&self) -> Vec<CyclePoint> {
        self.prerequisites.iter().map(|(k, _)| k.point.clone()).collect()
    }

    pub fn next_point(&self) -> Option<CyclePoint> {
        self.tdef.next_point(&self.point)
    }
}
