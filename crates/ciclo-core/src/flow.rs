//! Manager de flows: contador, metadatos y conversión de opciones CLI.
//!
//! Invariantes:
//! - Los números de flow persistidos son un conjunto cerrado: la asignación
//!   nueva toma el menor entero por encima del máximo ya registrado, sin
//!   reusar huecos.
//! - Un registro de flow es inmutable una vez creado; los metadatos de un
//!   flow ya conocido se ignoran con warning.

use indexmap::IndexMap;
use log::{info, warn};

use ciclo_domain::{FlowNums, InputError};
use ciclo_persistence::{PersistenceError, WorkflowDatabaseManager};

use crate::util::now_time_string;

pub const FLOW_ALL: &str = "all";
pub const FLOW_NEW: &str = "new";
pub const FLOW_NONE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMetadata {
    pub description: String,
    pub start_time: String,
}

#[derive(Debug, Default)]
pub struct FlowManager {
    flows: IndexMap<i64, FlowMetadata>,
    counter: i64,
}

impl FlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flows(&self) -> &IndexMap<i64, FlowMetadata> {
        &self.flows
    }

    /// Registra y devuelve un número de flow válido.
    ///
    /// Sin número: incrementa el contador automático salteando números ya
    /// creados a mano fuera de secuencia. Con número conocido: lo devuelve
    /// tal cual (los metadatos se ignoran). Con número nuevo: lo registra y
    /// encola el insert en `workflow_flows`.
    pub fn get_flow(&mut self,
                    db_mgr: &mut WorkflowDatabaseManager,
                    flow_num: Option<i64>,
                    meta: Option<&str>)
                    -> i64 {
        let flow_num = match flow_num {
            Some(n) => n,
            None => {
                self.counter += 1;
                while self.flows.contains_key(&self.counter) {
                    self.counter += 1;
                }
                self.counter
            }
        };
        if self.flows.contains_key(&flow_num) {
            if let Some(meta) = meta {
                if !meta.is_empty() {
                    warn!("ignoring flow metadata \"{meta}\": {flow_num} is not a new flow");
                }
            }
            return flow_num;
        }
        let meta = match meta {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => "no description".to_string(),
        };
        let record = FlowMetadata { description: meta.clone(),
                                    start_time: now_time_string() };
        info!("New flow: {flow_num} ({meta})");
        db_mgr.put_insert_workflow_flows(flow_num, &record.start_time, &record.description);
        self.flows.insert(flow_num, record);
        flow_num
    }

    /// Convierte opciones `--flow` ya validadas a números concretos.
    /// `[none]` → conjunto vacío; `[new]` → flow recién asignado; enteros →
    /// cada uno registrado si hiciera falta.
    pub fn cli_to_flow_nums(&mut self,
                            db_mgr: &mut WorkflowDatabaseManager,
                            flow: &[String],
                            meta: Option<&str>)
                            -> Result<FlowNums, InputError> {
        validate_flow_opts(flow, meta, false)?;
        if flow.len() == 1 && flow[0] == FLOW_NONE {
            return Ok(FlowNums::new());
        }
        if flow.len() == 1 && flow[0] == FLOW_NEW {
            return Ok(FlowNums::from([self.get_flow(db_mgr, None, meta)]));
        }
        let mut nums = FlowNums::new();
        for token in flow {
            let n: i64 = token.parse()
                              .map_err(|_| InputError(format!("invalid flow number: {token}")))?;
            nums.insert(self.get_flow(db_mgr, Some(n), meta));
        }
        Ok(nums)
    }

    /// Carga para el restart: el contador arranca en el máximo registrado y
    /// se cargan los metadatos de los flows presentes en el pool.
    pub fn load_from_db(&mut self,
                        db_mgr: &mut WorkflowDatabaseManager,
                        flow_nums: &FlowNums)
                        -> Result<(), PersistenceError> {
        let dao = db_mgr.pri_dao()?;
        self.counter = dao.select_workflow_flows_max_flow_num()?;
        self.flows = dao.select_workflow_flows(flow_nums)?
                        .into_iter()
                        .map(|(num, row)| {
                            (num,
                             FlowMetadata { description: row.description,
                                            start_time: row.start_time })
                        })
                        .collect();
        self.log_flows();
        Ok(())
    }

    fn log_flows(&self) {
        if self.flows.is_empty() {
            info!("Flows: (none)");
            return;
        }
        for (num, meta) in &self.flows {
            info!("flow: {num} ({}) {}", meta.description, meta.start_time);
        }
    }
}

/// Gramática de las opciones de flow: cada `--flow` es `all`, `new`, `none`
/// o un entero positivo; varios valores deben ser todos enteros; `--meta`
/// sólo con `new`; `--wait` es incompatible con `new` y `none`.
pub fn validate_flow_opts(flow: &[String], meta: Option<&str>, flow_wait: bool) -> Result<(), InputError> {
    let has_meta = meta.is_some_and(|m| !m.is_empty());
    if flow.len() > 1 {
        for token in flow {
            if token.parse::<i64>().map(|n| n > 0).unwrap_or(false) {
                continue;
            }
            return Err(InputError(format!("multiple flow values must all be integers, got: {token}")));
        }
    } else if let Some(token) = flow.first() {
        match token.as_str() {
            FLOW_ALL | FLOW_NEW | FLOW_NONE => {}
            other if other.parse::<i64>().map(|n| n > 0).unwrap_or(false) => {}
            other => {
                return Err(InputError(format!("--flow must be one of all, new, none or a positive integer, \
                                               got: {other}")))
            }
        }
    }
    let single = |keyword: &str| flow.len() == 1 && flow[0] == keyword;
    if has_meta && !single(FLOW_NEW) {
        return Err(InputError("--meta is only valid with --flow=new".into()));
    }
    if flow_wait && (single(FLOW_NEW) || single(FLOW_NONE)) {
        return Err(InputError(format!("--wait is not compatible with --flow={}", flow[0])));
    }
    Ok(())
}
