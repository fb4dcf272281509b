//! Configuración del workflow: el contrato con el parser de grafo.
//!
//! El parser externo produce las definiciones de tarea, las recurrencias y
//! los parámetros de ciclado; aquí sólo se agregan en una estructura
//! inmutable que el pool consulta. `WorkflowConfigBuilder` arma
//! configuraciones a mano para tests y demos.

use indexmap::IndexMap;
use std::sync::Arc;

use ciclo_cycling::{CycleInterval, CyclePoint, CycleSequence, CyclingMode};
use ciclo_domain::{TaskDef, WorkflowConfigError};

use crate::queues::QueueConfig;

/// Límite de runahead: conteo de ciclos (`P5`) o intervalo (`PT12H`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunaheadLimit {
    Cycles(i64),
    Interval(CycleInterval),
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub workflow_id: String,
    pub cycling_mode: CyclingMode,
    pub initial_point: CyclePoint,
    pub final_point: Option<CyclePoint>,
    /// Punto de arranque efectivo (puede diferir del inicial en un warm
    /// start); el governor de runahead parte de aquí con el pool vacío.
    pub start_point: CyclePoint,
    pub runahead_limit: RunaheadLimit,
    pub taskdefs: IndexMap<String, Arc<TaskDef>>,
    pub queues: Vec<QueueConfig>,
    /// Tareas cuyo fallo se considera esperado; `Some` activa el abort
    /// ante cualquier fallo fuera de la lista (modo test de referencia).
    pub expected_failed_tasks: Option<Vec<String>>,
    /// Plataformas conocidas por la configuración global; un restart que
    /// referencia otra cosa es fatal.
    pub platforms: Vec<String>,
    /// Compatibilidad con grafos de la generación anterior: éxito requerido,
    /// hijos pre-engendrados, tareas fallidas fuera del límite de runahead.
    pub back_compat: bool,
}

impl WorkflowConfig {
    pub fn get_taskdef(&self, name: &str) -> Result<Arc<TaskDef>, WorkflowConfigError> {
        self.taskdefs
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowConfigError(format!("task not defined: {name}")))
    }

    /// Unión de las recurrencias de todas las tareas (candidatos de
    /// runahead).
    pub fn sequences(&self) -> Vec<&CycleSequence> {
        let mut seqs = Vec::new();
        for tdef in self.taskdefs.values() {
            for seq in &tdef.sequences {
                if !seqs.contains(&seq) {
                    seqs.push(seq);
                }
            }
        }
        seqs
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfigBuilder {
    config: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn new(workflow_id: &str, cycling_mode: CyclingMode, initial_point: CyclePoint) -> Self {
        Self { config: WorkflowConfig { workflow_id: workflow_id.to_string(),
                                        cycling_mode,
                                        initial_point: initial_point.clone(),
                                        final_point: None,
                                        start_point: initial_point,
                                        runahead_limit: RunaheadLimit::Cycles(5),
                                        taskdefs: IndexMap::new(),
                                        queues: Vec::new(),
                                        expected_failed_tasks: None,
                                        platforms: vec!["localhost".to_string()],
                                        back_compat: false } }
    }

    pub fn with_final_point(mut self, point: CyclePoint) -> Self {
        self.config.final_point = Some(point);
        self
    }

    pub fn with_start_point(mut self, point: CyclePoint) -> Self {
        self.config.start_point = point;
        self
    }

    pub fn with_runahead_limit(mut self, limit: RunaheadLimit) -> Self {
        self.config.runahead_limit = limit;
        self
    }

    pub fn with_taskdef(mut self, tdef: TaskDef) -> Self {
        self.config.taskdefs.insert(tdef.name.clone(), Arc::new(tdef));
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.config.queues.push(queue);
        self
    }

    pub fn with_expected_failed_task(mut self, identity: &str) -> Self {
        self.config
            .expected_failed_tasks
            .get_or_insert_with(Vec::new)
            .push(identity.to_string());
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.config.platforms.push(platform.to_string());
        self
    }

    pub fn back_compat(mut self, enabled: bool) -> Self {
        self.config.back_compat = enabled;
        self
    }

    pub fn build(self) -> WorkflowConfig {
        self.config
    }
}
