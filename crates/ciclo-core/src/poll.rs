//! Polling acotado de condiciones: `max_polls` intentos cada `interval`
//! segundos.
//!
//! El poller es el único punto de suspensión del kernel: duerme entre
//! intentos con sleeps explícitos, nunca dentro de una transición del pool.

use log::{debug, warn};
use std::path::PathBuf;
use std::time::Duration;

use ciclo_domain::{InputError, WorkflowError};
use ciclo_persistence::{CheckerError, StateQuery, WorkflowDbChecker};

/// Condición a rechequear. Las implementaciones no deben bloquear: el
/// poller es quien espera.
pub trait PollChecker {
    /// Descripción corta para logs, p.ej. "task foo at 2 succeeded".
    fn condition(&self) -> String;
    fn check(&mut self) -> Result<bool, WorkflowError>;
}

pub struct Poller {
    pub interval: Duration,
    pub max_polls: u32,
    n_polls: u32,
}

impl Poller {
    pub fn new(interval_secs: u64, max_polls: u32) -> Self {
        Self { interval: Duration::from_secs(interval_secs),
               max_polls,
               n_polls: 0 }
    }

    /// Reintenta la condición hasta agotar los polls. `Ok(true)` si se
    /// cumplió, `Ok(false)` si se agotó (exit 1 en la CLI).
    pub fn poll(&mut self, checker: &mut dyn PollChecker) -> Result<bool, WorkflowError> {
        if self.max_polls == 0 {
            // No podemos saber si la condición se cumple sin chequear.
            return Err(InputError("nothing to do (max_polls=0)".into()).into());
        }
        if self.max_polls == 1 {
            debug!("checking for {}", checker.condition());
        } else {
            debug!("polling (max {} x {:?}) for {}", self.max_polls, self.interval, checker.condition());
        }
        while self.n_polls < self.max_polls {
            self.n_polls += 1;
            if checker.check()? {
                return Ok(true);
            }
            if self.max_polls > 1 && self.n_polls < self.max_polls {
                std::thread::sleep(self.interval);
            }
        }
        let mut err = "condition not satisfied".to_string();
        if self.max_polls > 1 {
            err.push_str(&format!(" after {} polls", self.max_polls));
        }
        warn!("{err}");
        Ok(false)
    }
}

/// Condición sobre la base pública de un workflow: hay al menos una fila
/// que matchea la consulta.
pub struct WorkflowStatePoller {
    db_path: PathBuf,
    query: StateQuery,
    offset: Option<String>,
}

impl WorkflowStatePoller {
    pub fn new(db_path: impl Into<PathBuf>, query: StateQuery, offset: Option<String>) -> Self {
        Self { db_path: db_path.into(),
               query,
               offset }
    }
}

impl PollChecker for WorkflowStatePoller {
    fn condition(&self) -> String {
        format!("{}/{} {}",
                self.query.cycle.as_deref().unwrap_or("*"),
                self.query.task.as_deref().unwrap_or("*"),
                self.query.selector.as_deref().unwrap_or("(any)"))
    }

    fn check(&mut self) -> Result<bool, WorkflowError> {
        if !self.db_path.is_file() {
            // El workflow pudo no haber arrancado todavía; el poll sigue.
            return Ok(false);
        }
        let checker = WorkflowDbChecker::new(&self.db_path)
            .map_err(|e| WorkflowError::Other(e.to_string()))?;
        let mut query = self.query.clone();
        query.cycle = checker.adjust_point_to_db(query.cycle.as_deref(), self.offset.as_deref())
                             .map_err(WorkflowError::Input)?;
        match checker.workflow_state_query(&query) {
            Ok(rows) => Ok(!rows.is_empty()),
            Err(CheckerError::Input(e)) => Err(e.into()),
            Err(CheckerError::Db(e)) => Err(WorkflowError::Other(e.to_string())),
        }
    }
}
