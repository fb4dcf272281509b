//! Máquina de estados de una instancia de tarea.
//!
//! El ciclo de vida observable es
//! `waiting → preparing → submitted → running → {succeeded|failed}`, con
//! `expired` como salida temprana desde `waiting`. Las cadenas en minúsculas
//! son el contrato con la base de datos y con las consultas de estado.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::InputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Preparing,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Expired,
}

impl TaskStatus {
    pub const ALL: &'static [TaskStatus] = &[TaskStatus::Waiting,
                                             TaskStatus::Preparing,
                                             TaskStatus::Submitted,
                                             TaskStatus::Running,
                                             TaskStatus::Succeeded,
                                             TaskStatus::Failed,
                                             TaskStatus::Expired];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<TaskStatus, InputError> {
        Self::ALL.iter()
                 .find(|s| s.as_str() == value)
                 .copied()
                 .ok_or_else(|| InputError(format!("invalid task status: {value}")))
    }

    /// Estados terminales de la instancia.
    pub fn is_final(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Expired)
    }

    /// Estados con un job en vuelo o a punto de estarlo. Cuentan como
    /// "instancias activas" para los límites de cola y para `can_stop`.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Preparing | TaskStatus::Submitted | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
