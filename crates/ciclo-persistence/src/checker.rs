//! Consultas de sólo-lectura sobre la réplica pública, para polling y CLI.
//!
//! El checker abre la base con un busy timeout largo (los lectores externos
//! pueden tolerar esperas; el scheduler no). Las consultas de estado van
//! contra `task_states`; las de outputs/mensajes contra `task_outputs`
//! decodificando el mapa JSON por fila.

use rusqlite::Connection;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use ciclo_cycling::{add_offset, parse_point, CyclingMode};
use ciclo_domain::{deserialise_flow_nums, hash_value, stringify_flow_nums, InputError, OUT_FAILED, OUT_SUCCEEDED};

use crate::dao::WorkflowDao;
use crate::error::PersistenceError;
use crate::manager::{KEY_CYCLE_POINT_FORMAT, KEY_CYCLING_MODE};

const CHECKER_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Error de consulta: argumentos inválidos o falla de la base.
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Db(#[from] PersistenceError),
}

fn db_err(err: rusqlite::Error) -> CheckerError {
    CheckerError::Db(PersistenceError::from(err))
}

/// Parámetros de una consulta de estado/outputs.
#[derive(Debug, Clone, Default)]
pub struct StateQuery {
    pub task: Option<String>,
    pub cycle: Option<String>,
    pub selector: Option<String>,
    pub is_output: bool,
    pub is_message: bool,
    pub flow_num: Option<i64>,
    /// Permite selectores transitorios (`preparing`, `running`) que una
    /// consulta puntual puede perderse entre polls.
    pub allow_transient: bool,
}

/// Timing de un job exitoso, para reportes fuera del scheduler. Se elige
/// el registro de cada submission exitosa; la interpretación (colas,
/// tiempos de corrida) corre por cuenta del consumidor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTimingRow {
    pub name: String,
    pub cycle: String,
    pub platform_name: Option<String>,
    pub time_submit: Option<String>,
    pub time_run: Option<String>,
    pub time_run_exit: Option<String>,
}

/// Fila de resultado: tarea, ciclo y estado u outputs, más la forma
/// canónica de los flows (`1,2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateQueryRow {
    pub name: String,
    pub cycle: String,
    pub result: String,
    pub flows: String,
}

pub struct WorkflowDbChecker {
    conn: Connection,
    db_point_format: Option<String>,
    cycling_mode: CyclingMode,
}

impl WorkflowDbChecker {
    pub fn new(db_path: &Path) -> Result<Self, PersistenceError> {
        let conn = WorkflowDao::connect_read_only(db_path, CHECKER_BUSY_TIMEOUT)?;
        let db_point_format = select_param(&conn, KEY_CYCLE_POINT_FORMAT)?;
        let cycling_mode = match select_param(&conn, KEY_CYCLING_MODE)?.as_deref() {
            Some("integer") | None => CyclingMode::Integer,
            _ => CyclingMode::DateTime,
        };
        Ok(Self { conn,
                  db_point_format,
                  cycling_mode })
    }

    pub fn cycling_mode(&self) -> CyclingMode {
        self.cycling_mode
    }

    /// Formato de punto registrado por el workflow, si alguno.
    pub fn db_point_format(&self) -> Option<&str> {
        self.db_point_format.as_deref()
    }

    /// Normaliza un punto (con offset opcional) a la forma que la DB
    /// persiste como literal. Globs pasan tal cual y no admiten offset.
    pub fn adjust_point_to_db(&self,
                              cycle: Option<&str>,
                              offset: Option<&str>)
                              -> Result<Option<String>, InputError> {
        let Some(cycle) = cycle else {
            if offset.is_some() {
                return Err(InputError("an offset needs a cycle point to apply to".into()));
            }
            return Ok(None);
        };
        if cycle.contains('*') {
            if offset.is_some() {
                return Err(InputError(format!("cycle point \"{cycle}\" is not compatible with an offset")));
            }
            return Ok(Some(cycle.to_string()));
        }
        let mut point = parse_point(cycle, self.cycling_mode)
            .map_err(|e| InputError(format!("invalid cycle point \"{cycle}\": {e}")))?;
        if let Some(offset) = offset {
            point = add_offset(&point, offset).map_err(|e| InputError(format!("bad offset: {e}")))?;
        }
        Ok(Some(point.to_db_string()))
    }

    /// Consulta dinámica de estados u outputs.
    pub fn workflow_state_query(&self, query: &StateQuery) -> Result<Vec<StateQueryRow>, CheckerError> {
        if let Some(reason) = forbidden_selector(query) {
            return Err(CheckerError::Input(InputError(reason)));
        }
        let target_table = if query.is_output || query.is_message {
            "task_outputs"
        } else {
            "task_states"
        };
        let mask = if query.is_output || query.is_message {
            "name, cycle, outputs, flow_nums"
        } else {
            "name, cycle, status, flow_nums"
        };

        let mut wheres: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(task) = &query.task {
            if task.contains('*') {
                wheres.push("name like ?".into());
                args.push(task.replace('*', "%"));
            } else {
                wheres.push("name==?".into());
                args.push(task.clone());
            }
        }
        if let Some(cycle) = &query.cycle {
            if cycle.contains('*') {
                wheres.push("cycle like ?".into());
                args.push(cycle.replace('*', "%"));
            } else {
                wheres.push("cycle==?".into());
                args.push(cycle.clone());
            }
        }
        let status_query = !(query.is_output || query.is_message);
        if status_query {
            if let Some(selector) = &query.selector {
                if matches!(selector.as_str(), "finish" | "finished") {
                    wheres.push(format!("status IN ('{OUT_SUCCEEDED}', '{OUT_FAILED}')"));
                } else {
                    wheres.push("status==?".into());
                    args.push(selector.clone());
                }
            }
        }

        let mut stmt = format!("SELECT {mask} FROM {target_table}");
        if !wheres.is_empty() {
            stmt.push_str(&format!(" WHERE {}", wheres.join(" AND ")));
        }
        if status_query {
            stmt.push_str(" ORDER BY submit_num");
        }

        let mut prepared = self.conn.prepare(&stmt).map_err(db_err)?;
        let mut rows = Vec::new();
        let mut raw = prepared.query(rusqlite::params_from_iter(args.iter())).map_err(db_err)?;
        while let Some(row) = raw.next().map_err(db_err)? {
            let name: String = row.get(0).map_err(db_err)?;
            let cycle: String = row.get(1).map_err(db_err)?;
            let Some(result) = row.get::<_, Option<String>>(2).map_err(db_err)? else {
                continue;
            };
            let flow_nums = deserialise_flow_nums(&row.get::<_, String>(3).map_err(db_err)?);
            if let Some(wanted) = query.flow_num {
                if !flow_nums.contains(&wanted) {
                    continue;
                }
            }
            let flows = stringify_flow_nums(&flow_nums);
            rows.push(StateQueryRow { name,
                                      cycle,
                                      result,
                                      flows });
        }

        if status_query {
            return Ok(rows);
        }

        // Consulta de outputs: decodificar el mapa JSON y filtrar por
        // selector (labels para outputs, mensajes para --message).
        let mut results = Vec::new();
        for row in rows {
            let map: BTreeMap<String, String> = serde_json::from_str(&row.result).unwrap_or_default();
            let candidates: Vec<&String> = if query.is_message {
                map.values().collect()
            } else {
                map.keys().collect()
            };
            let matched = match &query.selector {
                None => true,
                Some(sel) if matches!(sel.as_str(), "finish" | "finished") => {
                    map.contains_key(OUT_SUCCEEDED) || map.contains_key(OUT_FAILED)
                }
                Some(sel) => candidates.iter().any(|c| *c == sel),
            };
            if matched {
                let listed: Vec<String> = if query.is_message {
                    map.values().cloned().collect()
                } else {
                    map.keys().cloned().collect()
                };
                results.push(StateQueryRow { result: format!("[{}]", listed.join(", ")),
                                             ..row });
            }
        }
        Ok(results)
    }

    /// Tiempos de submit/arranque/fin de los jobs exitosos, para el
    /// reporte de timings de la CLI.
    pub fn select_task_times(&self) -> Result<Vec<TaskTimingRow>, PersistenceError> {
        const STMT: &str = "
            SELECT name, cycle, platform_name, time_submit, time_run, time_run_exit
            FROM task_jobs
            WHERE run_status = 0
            ORDER BY time_run_exit";
        let mut prepared = self.conn.prepare(STMT)?;
        let rows = prepared.query_map([], |row| {
                               Ok(TaskTimingRow { name: row.get(0)?,
                                                  cycle: row.get(1)?,
                                                  platform_name: row.get(2)?,
                                                  time_submit: row.get(3)?,
                                                  time_run: row.get(4)?,
                                                  time_run_exit: row.get(5)? })
                           })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Fingerprint del estado visible: cambia si cambia cualquier
    /// `(name, cycle, status, flows)`. Permite a los pollers detectar
    /// movimiento sin comparar filas una a una.
    pub fn state_fingerprint(&self) -> Result<String, PersistenceError> {
        let mut prepared = self.conn
                               .prepare("SELECT name, cycle, status, flow_nums FROM task_states \
                                         ORDER BY name, cycle, flow_nums")?;
        let rows = prepared.query_map([], |row| {
                               Ok(Value::Array(vec![Value::String(row.get(0)?),
                                                    Value::String(row.get(1)?),
                                                    Value::String(row.get::<_, Option<String>>(2)?.unwrap_or_default()),
                                                    Value::String(row.get(3)?)]))
                           })?;
        let all: Vec<Value> = rows.collect::<Result<_, _>>()?;
        Ok(hash_value(&Value::Array(all)))
    }
}

fn select_param(conn: &Connection, key: &str) -> Result<Option<String>, PersistenceError> {
    let mut stmt = conn.prepare("SELECT value FROM workflow_params WHERE key==?")?;
    let mut rows = stmt.query_map([key], |row| row.get::<_, Option<String>>(0))?;
    match rows.next() {
        Some(value) => Ok(value?),
        None => Ok(None),
    }
}

// Selectores de estado que un poll puntual no puede observar con fiabilidad:
// `waiting` se pierde apenas la tarea se libera, y los transitorios sólo se
// admiten bajo bandera explícita.
fn forbidden_selector(query: &StateQuery) -> Option<String> {
    if query.is_output || query.is_message {
        return None;
    }
    let selector = query.selector.as_deref()?;
    match selector {
        "waiting" => Some("cannot poll for status \"waiting\": tasks are created in that state \
                           and leave it without record"
                              .to_string()),
        "preparing" | "running" if !query.allow_transient => {
            Some(format!("cannot reliably poll for transient status \"{selector}\"; \
                          poll for an output instead, or pass the transient flag"))
        }
        _ => None,
    }
}
