//! Manager de base de datos del workflow: espeja la primaria en la réplica
//! pública y da al scheduler escritores stage-only.
//!
//! Responsabilidades:
//! - Al arrancar: crear primaria (0600) y pública (0644) y copiar
//!   primaria → pública; en restart, hacer vacuum e incrementar `n_restart`.
//! - Escritores `put_*`: sólo llenan los mapas de staging; nada se escribe
//!   hasta `process_queued_ops`, que vuelca el staging en ambos DAOs y
//!   ejecuta (primaria fatal en error; pública con reintentos y, tras
//!   `MAX_TRIES`, reconstrucción por copia de archivo).
//! - Escalera de compatibilidad: rechaza DBs de versiones anteriores a la
//!   primera con esquema estable y aplica parches aditivos idempotentes.

use indexmap::IndexMap;
use log::{info, warn};
use rusqlite::types::Value as SqlValue;
use std::fs;
use std::path::{Path, PathBuf};

use ciclo_domain::ServiceFileError;

use crate::dao::WorkflowDao;
use crate::error::PersistenceError;
use crate::paths::RunDirLayout;
use crate::schema::{TABLE_ABS_OUTPUTS, TABLE_BROADCAST_EVENTS, TABLE_BROADCAST_STATES, TABLE_INHERITANCE,
                    TABLE_TASKS_TO_HOLD, TABLE_TASK_ACTION_TIMERS, TABLE_TASK_EVENTS, TABLE_TASK_JOBS,
                    TABLE_TASK_LATE_FLAGS, TABLE_TASK_OUTPUTS, TABLE_TASK_POOL, TABLE_TASK_PREREQUISITES,
                    TABLE_TASK_STATES, TABLE_TASK_TIMEOUT_TIMERS, TABLE_WORKFLOW_FLOWS, TABLE_WORKFLOW_PARAMS,
                    TABLE_WORKFLOW_TEMPLATE_VARS, TABLE_XTRIGGERS};
use crate::version::{parse_version, Version};

/// Versión del scheduler; se persiste en `workflow_params` y gobierna la
/// escalera de upgrades en el restart.
pub const CICLO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// DBs escritas por versiones anteriores a ésta se rechazan de plano.
pub const RESTART_INCOMPAT_VERSION: &str = "0.3.0";

pub const KEY_UUID_STR: &str = "uuid_str";
pub const KEY_VERSION: &str = "ciclo_version";
pub const KEY_UTC_MODE: &str = "UTC_mode";
pub const KEY_RESTART_COUNT: &str = "n_restart";
pub const KEY_PAUSED: &str = "is_paused";
pub const KEY_INITIAL_CYCLE_POINT: &str = "icp";
pub const KEY_FINAL_CYCLE_POINT: &str = "fcp";
pub const KEY_START_CYCLE_POINT: &str = "startcp";
pub const KEY_STOP_CYCLE_POINT: &str = "stopcp";
pub const KEY_HOLD_CYCLE_POINT: &str = "holdcp";
pub const KEY_STOP_CLOCK_TIME: &str = "stop_clock_time";
pub const KEY_STOP_TASK: &str = "stop_task";
pub const KEY_CYCLE_POINT_FORMAT: &str = "cycle_point_format";
pub const KEY_CYCLING_MODE: &str = "cycling_mode";
pub const KEY_RUN_MODE: &str = "run_mode";

type ArgList = Vec<(&'static str, SqlValue)>;

/// Inserción en `task_states` para una instancia nueva o re-creada.
#[derive(Debug, Clone)]
pub struct TaskStatesInsert {
    pub cycle: String,
    pub name: String,
    pub flow_nums: String,
    pub time_created: String,
    pub time_updated: String,
    pub submit_num: i64,
    pub status: String,
    pub flow_wait: bool,
    pub is_manual_submit: bool,
    pub is_complete: bool,
}

/// Actualización en sitio de `task_states` (tabla snapshot aparte).
#[derive(Debug, Clone)]
pub struct TaskStateUpdate {
    pub cycle: String,
    pub name: String,
    pub flow_nums: String,
    pub time_updated: String,
    pub submit_num: i64,
    pub status: String,
    pub is_manual_submit: bool,
    pub is_complete: bool,
}

#[derive(Debug, Clone)]
pub struct PrereqInsert {
    pub prereq_name: String,
    pub prereq_cycle: String,
    pub prereq_output: String,
    pub satisfied: String,
}

/// Entrada del snapshot del pool vivo para `put_task_pool`.
#[derive(Debug, Clone)]
pub struct TaskPoolSnapshotEntry {
    pub cycle: String,
    pub name: String,
    pub flow_nums: String,
    pub status: String,
    pub is_held: bool,
    pub timeout: Option<f64>,
    pub prereqs: Vec<PrereqInsert>,
    pub state_update: Option<TaskStateUpdate>,
}

#[derive(Debug, Clone)]
pub struct TaskJobsInsert {
    pub cycle: String,
    pub name: String,
    pub submit_num: i64,
    pub flow_nums: String,
    pub is_manual_submit: bool,
    pub try_num: i64,
    pub time_submit: String,
    pub platform_name: String,
    pub job_runner_name: String,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskEventInsert {
    pub name: String,
    pub cycle: String,
    pub time: String,
    pub submit_num: i64,
    pub event: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ActionTimerInsert {
    pub cycle: String,
    pub name: String,
    pub ctx_key: String,
    pub ctx: Option<String>,
    pub delays: Option<String>,
    pub num: Option<i64>,
    pub delay: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BroadcastSetting {
    pub point: String,
    pub namespace: String,
    pub key: String,
    pub value: String,
}

pub struct WorkflowDatabaseManager {
    pri_path: PathBuf,
    pub_path: PathBuf,
    pri_dao: Option<WorkflowDao>,
    pub_dao: Option<WorkflowDao>,
    pub n_restart: i64,
    deletes_map: IndexMap<&'static str, Vec<ArgList>>,
    inserts_map: IndexMap<&'static str, Vec<ArgList>>,
    updates_map: IndexMap<&'static str, Vec<(ArgList, ArgList)>>,
}

impl WorkflowDatabaseManager {
    pub fn new(pri_path: impl AsRef<Path>, pub_path: impl AsRef<Path>) -> Self {
        Self { pri_path: pri_path.as_ref().to_path_buf(),
               pub_path: pub_path.as_ref().to_path_buf(),
               pri_dao: None,
               pub_dao: None,
               n_restart: 0,
               deletes_map: IndexMap::new(),
               inserts_map: IndexMap::new(),
               updates_map: IndexMap::new() }
    }

    pub fn from_layout(layout: &RunDirLayout) -> Self {
        Self::new(layout.primary_db(), layout.public_db())
    }

    pub fn pri_path(&self) -> &Path {
        &self.pri_path
    }

    pub fn pub_path(&self) -> &Path {
        &self.pub_path
    }

    /// DAO primario abierto; error si el manager no arrancó todavía.
    pub fn pri_dao(&mut self) -> Result<&mut WorkflowDao, PersistenceError> {
        self.pri_dao
            .as_mut()
            .ok_or_else(|| PersistenceError::Unknown("database manager not started".into()))
    }

    /// Inicializa ambos DAOs. En un arranque frío elimina cualquier primaria
    /// obsoleta; la detección de restart es responsabilidad del llamador
    /// (existencia del archivo primario).
    pub fn on_workflow_start(&mut self, is_restart: bool) -> Result<(), PersistenceError> {
        if !is_restart && self.pri_path.exists() {
            fs::remove_file(&self.pri_path)?;
        }
        if let Some(dir) = self.pri_path.parent() {
            fs::create_dir_all(dir)?;
        }
        if let Some(dir) = self.pub_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let pri = WorkflowDao::new(&self.pri_path, false, true)?;
        set_mode(&self.pri_path, 0o600)?;
        self.pri_dao = Some(pri);
        self.pub_dao = Some(WorkflowDao::new(&self.pub_path, true, false)?);
        self.copy_pri_to_pub()?;
        set_mode(&self.pub_path, 0o644)?;
        Ok(())
    }

    pub fn on_workflow_shutdown(&mut self) {
        if let Some(mut dao) = self.pri_dao.take() {
            dao.close();
        }
        if let Some(mut dao) = self.pub_dao.take() {
            dao.close();
        }
    }

    /// Copia el contenido de la primaria sobre la pública, vía archivo
    /// temporal + rename atómico, preservando los bits de modo.
    pub fn copy_pri_to_pub(&mut self) -> Result<(), PersistenceError> {
        if let Some(dao) = self.pub_dao.as_mut() {
            dao.close();
        }
        // Crear el archivo si no existía, para poder leer su modo.
        if !self.pub_path.exists() {
            fs::File::create(&self.pub_path)?;
        }
        let mode = fs::metadata(&self.pub_path)?.permissions();
        let tmp_path = self.pub_path.with_extension("tmp");
        let result = (|| -> Result<(), PersistenceError> {
            fs::copy(&self.pri_path, &tmp_path)?;
            fs::rename(&tmp_path, &self.pub_path)?;
            fs::set_permissions(&self.pub_path, mode)?;
            Ok(())
        })();
        if result.is_err() && tmp_path.exists() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Reconstruye la réplica tras `MAX_TRIES` fallos consecutivos.
    pub fn recover_pub_from_pri(&mut self) -> Result<(), PersistenceError> {
        let tries = self.pub_dao.as_ref().map(|d| d.n_tries).unwrap_or(0);
        if tries >= WorkflowDao::MAX_TRIES {
            self.copy_pri_to_pub()?;
            warn!("{}: recovered from {}", self.pub_path.display(), self.pri_path.display());
            if let Some(dao) = self.pub_dao.as_mut() {
                dao.n_tries = 0;
            }
        }
        Ok(())
    }

    /// Vuelca el staging a ambos DAOs y ejecuta. Primaria: fatal en error.
    /// Pública: el error queda contado dentro del DAO y, llegado el límite,
    /// se reconstruye por copia.
    pub fn process_queued_ops(&mut self) -> Result<(), PersistenceError> {
        let (Some(pri), Some(publ)) = (self.pri_dao.as_mut(), self.pub_dao.as_mut()) else {
            return Ok(());
        };
        for (table, items) in std::mem::take(&mut self.deletes_map) {
            for where_args in items {
                pri.add_delete_item(table, &where_args);
                publ.add_delete_item(table, &where_args);
            }
        }
        for (table, items) in std::mem::take(&mut self.inserts_map) {
            for args in items {
                pri.add_insert_item(table, &args);
                publ.add_insert_item(table, &args);
            }
        }
        for (table, items) in std::mem::take(&mut self.updates_map) {
            for (set_args, where_args) in items {
                pri.add_update_item(table, &set_args, &where_args);
                publ.add_update_item(table, &set_args, &where_args);
            }
        }
        pri.execute_queued_items()?;
        publ.execute_queued_items()?;
        self.recover_pub_from_pri()
    }

    /// Chequeo de restart: vacuum de la primaria y bump de `n_restart`.
    pub fn restart_check(&mut self) -> Result<(), PersistenceError> {
        let dao = self.pri_dao()?;
        dao.vacuum()?;
        let n_restart = dao.select_workflow_params_restart_count()? + 1;
        self.n_restart = n_restart;
        self.put_workflow_params_1(KEY_RESTART_COUNT, Some(n_restart.to_string()));
        self.process_queued_ops()
    }

    // ----- escritores stage-only ----------------------------------------

    pub fn put_workflow_params(&mut self, params: &[(&'static str, Option<String>)]) {
        for (key, value) in params {
            self.put_workflow_params_1(key, value.clone());
        }
    }

    pub fn put_workflow_params_1(&mut self, key: &'static str, value: Option<String>) {
        self.inserts_map
            .entry(TABLE_WORKFLOW_PARAMS)
            .or_default()
            .push(vec![("key", SqlValue::from(key.to_string())), ("value", sql_opt(value))]);
    }

    pub fn put_workflow_paused(&mut self, paused: bool) {
        self.put_workflow_params_1(KEY_PAUSED, Some((paused as i64).to_string()));
    }

    pub fn put_workflow_stop_point(&mut self, value: Option<String>) {
        self.put_workflow_params_1(KEY_STOP_CYCLE_POINT, value);
    }

    pub fn put_workflow_hold_point(&mut self, value: Option<String>) {
        self.put_workflow_params_1(KEY_HOLD_CYCLE_POINT, value);
    }

    pub fn put_workflow_stop_task(&mut self, value: Option<String>) {
        self.put_workflow_params_1(KEY_STOP_TASK, value);
    }

    pub fn put_workflow_stop_clock_time(&mut self, value: Option<String>) {
        self.put_workflow_params_1(KEY_STOP_CLOCK_TIME, value);
    }

    pub fn put_template_vars(&mut self, vars: &[(String, String)]) {
        for (key, value) in vars {
            self.inserts_map
                .entry(TABLE_WORKFLOW_TEMPLATE_VARS)
                .or_default()
                .push(vec![("key", SqlValue::from(key.clone())), ("value", SqlValue::from(value.clone()))]);
        }
    }

    pub fn put_runtime_inheritance(&mut self, inheritance: &[(String, String)]) {
        for (namespace, linearised) in inheritance {
            self.inserts_map
                .entry(TABLE_INHERITANCE)
                .or_default()
                .push(vec![("namespace", SqlValue::from(namespace.clone())),
                           ("inheritance", SqlValue::from(linearised.clone()))]);
        }
    }

    /// Altas/bajas de broadcast: cada cambio queda auditado en
    /// `broadcast_events` y el estado activo en `broadcast_states`.
    pub fn put_broadcast(&mut self, settings: &[BroadcastSetting], is_cancel: bool) {
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        for setting in settings {
            let change = if is_cancel { "-" } else { "+" };
            self.inserts_map
                .entry(TABLE_BROADCAST_EVENTS)
                .or_default()
                .push(vec![("time", SqlValue::from(now.to_string())),
                           ("change", SqlValue::from(change.to_string())),
                           ("point", SqlValue::from(setting.point.clone())),
                           ("namespace", SqlValue::from(setting.namespace.clone())),
                           ("key", SqlValue::from(setting.key.clone())),
                           ("value", SqlValue::from(setting.value.clone()))]);
            if is_cancel {
                self.deletes_map
                    .entry(TABLE_BROADCAST_STATES)
                    .or_default()
                    .push(vec![("point", SqlValue::from(setting.point.clone())),
                               ("namespace", SqlValue::from(setting.namespace.clone())),
                               ("key", SqlValue::from(setting.key.clone()))]);
            } else {
                self.inserts_map
                    .entry(TABLE_BROADCAST_STATES)
                    .or_default()
                    .push(vec![("point", SqlValue::from(setting.point.clone())),
                               ("namespace", SqlValue::from(setting.namespace.clone())),
                               ("key", SqlValue::from(setting.key.clone())),
                               ("value", SqlValue::from(setting.value.clone()))]);
            }
        }
    }

    pub fn put_xtriggers(&mut self, satisfied: &[(String, String)]) {
        for (signature, results) in satisfied {
            self.inserts_map
                .entry(TABLE_XTRIGGERS)
                .or_default()
                .push(vec![("signature", SqlValue::from(signature.clone())),
                           ("results", SqlValue::from(results.clone()))]);
        }
    }

    /// Reemplaza la tabla de holds futuros completa.
    pub fn put_tasks_to_hold(&mut self, tasks: &[(String, String)]) {
        self.deletes_map.insert(TABLE_TASKS_TO_HOLD, vec![Vec::new()]);
        self.inserts_map.insert(TABLE_TASKS_TO_HOLD,
                                tasks.iter()
                                     .map(|(name, cycle)| {
                                         vec![("name", SqlValue::from(name.clone())),
                                              ("cycle", SqlValue::from(cycle.clone()))]
                                     })
                                     .collect());
    }

    /// Snapshot del pool vivo: borra `task_pool`, `task_prerequisites` y
    /// `task_timeout_timers` completos y reinserta desde el pool; las filas
    /// de `task_states` se actualizan en sitio.
    pub fn put_task_pool(&mut self, entries: &[TaskPoolSnapshotEntry]) {
        self.deletes_map.entry(TABLE_TASK_POOL).or_default().push(Vec::new());
        self.deletes_map.entry(TABLE_TASK_PREREQUISITES).or_default().push(Vec::new());
        self.deletes_map.entry(TABLE_TASK_TIMEOUT_TIMERS).or_default().push(Vec::new());
        for entry in entries {
            for prereq in &entry.prereqs {
                self.inserts_map
                    .entry(TABLE_TASK_PREREQUISITES)
                    .or_default()
                    .push(vec![("cycle", SqlValue::from(entry.cycle.clone())),
                               ("name", SqlValue::from(entry.name.clone())),
                               ("flow_nums", SqlValue::from(entry.flow_nums.clone())),
                               ("prereq_name", SqlValue::from(prereq.prereq_name.clone())),
                               ("prereq_cycle", SqlValue::from(prereq.prereq_cycle.clone())),
                               ("prereq_output", SqlValue::from(prereq.prereq_output.clone())),
                               ("satisfied", SqlValue::from(prereq.satisfied.clone()))]);
            }
            self.inserts_map
                .entry(TABLE_TASK_POOL)
                .or_default()
                .push(vec![("cycle", SqlValue::from(entry.cycle.clone())),
                           ("name", SqlValue::from(entry.name.clone())),
                           ("flow_nums", SqlValue::from(entry.flow_nums.clone())),
                           ("status", SqlValue::from(entry.status.clone())),
                           ("is_held", SqlValue::from(entry.is_held as i64))]);
            if let Some(timeout) = entry.timeout {
                self.inserts_map
                    .entry(TABLE_TASK_TIMEOUT_TIMERS)
                    .or_default()
                    .push(vec![("cycle", SqlValue::from(entry.cycle.clone())),
                               ("name", SqlValue::from(entry.name.clone())),
                               ("timeout", SqlValue::from(timeout))]);
            }
            if let Some(update) = &entry.state_update {
                self.put_update_task_state(update.clone());
            }
        }
    }

    pub fn put_update_task_state(&mut self, update: TaskStateUpdate) {
        let set_args: ArgList = vec![("time_updated", SqlValue::from(update.time_updated)),
                                     ("submit_num", SqlValue::from(update.submit_num)),
                                     ("status", SqlValue::from(update.status)),
                                     ("is_manual_submit", SqlValue::from(update.is_manual_submit as i64)),
                                     ("is_complete", SqlValue::from(update.is_complete as i64))];
        let where_args: ArgList = vec![("cycle", SqlValue::from(update.cycle)),
                                       ("name", SqlValue::from(update.name)),
                                       ("flow_nums", SqlValue::from(update.flow_nums))];
        self.updates_map
            .entry(TABLE_TASK_STATES)
            .or_default()
            .push((set_args, where_args));
    }

    /// Update final de `flow_wait` para una tarea que ya salió del pool y
    /// acaba de engendrar a sus hijos en diferido.
    pub fn put_update_task_flow_wait(&mut self, cycle: &str, name: &str, flow_nums: &str, flow_wait: bool, now: &str) {
        self.updates_map
            .entry(TABLE_TASK_STATES)
            .or_default()
            .push((vec![("time_updated", SqlValue::from(now.to_string())),
                        ("flow_wait", SqlValue::from(flow_wait as i64))],
                   vec![("cycle", SqlValue::from(cycle.to_string())),
                        ("name", SqlValue::from(name.to_string())),
                        ("flow_nums", SqlValue::from(flow_nums.to_string()))]));
    }

    pub fn put_insert_task_states(&mut self, row: TaskStatesInsert) {
        self.inserts_map
            .entry(TABLE_TASK_STATES)
            .or_default()
            .push(vec![("name", SqlValue::from(row.name)),
                       ("cycle", SqlValue::from(row.cycle)),
                       ("flow_nums", SqlValue::from(row.flow_nums)),
                       ("time_created", SqlValue::from(row.time_created)),
                       ("time_updated", SqlValue::from(row.time_updated)),
                       ("submit_num", SqlValue::from(row.submit_num)),
                       ("status", SqlValue::from(row.status)),
                       ("flow_wait", SqlValue::from(row.flow_wait as i64)),
                       ("is_manual_submit", SqlValue::from(row.is_manual_submit as i64)),
                       ("is_complete", SqlValue::from(row.is_complete as i64))]);
    }

    /// Fila vacía de outputs para una instancia nueva.
    pub fn put_insert_task_outputs(&mut self, cycle: &str, name: &str, flow_nums: &str) {
        self.inserts_map
            .entry(TABLE_TASK_OUTPUTS)
            .or_default()
            .push(vec![("cycle", SqlValue::from(cycle.to_string())),
                       ("name", SqlValue::from(name.to_string())),
                       ("flow_nums", SqlValue::from(flow_nums.to_string())),
                       ("outputs", SqlValue::from("{}".to_string()))]);
    }

    pub fn put_update_task_outputs(&mut self, cycle: &str, name: &str, flow_nums: &str, outputs_json: &str) {
        self.updates_map
            .entry(TABLE_TASK_OUTPUTS)
            .or_default()
            .push((vec![("outputs", SqlValue::from(outputs_json.to_string()))],
                   vec![("cycle", SqlValue::from(cycle.to_string())),
                        ("name", SqlValue::from(name.to_string())),
                        ("flow_nums", SqlValue::from(flow_nums.to_string()))]));
    }

    pub fn put_insert_task_prerequisites(&mut self, cycle: &str, name: &str, flow_nums: &str, prereq: PrereqInsert) {
        self.inserts_map
            .entry(TABLE_TASK_PREREQUISITES)
            .or_default()
            .push(vec![("cycle", SqlValue::from(cycle.to_string())),
                       ("name", SqlValue::from(name.to_string())),
                       ("flow_nums", SqlValue::from(flow_nums.to_string())),
                       ("prereq_name", SqlValue::from(prereq.prereq_name)),
                       ("prereq_cycle", SqlValue::from(prereq.prereq_cycle)),
                       ("prereq_output", SqlValue::from(prereq.prereq_output)),
                       ("satisfied", SqlValue::from(prereq.satisfied))]);
    }

    pub fn put_insert_task_events(&mut self, event: TaskEventInsert) {
        self.inserts_map
            .entry(TABLE_TASK_EVENTS)
            .or_default()
            .push(vec![("name", SqlValue::from(event.name)),
                       ("cycle", SqlValue::from(event.cycle)),
                       ("time", SqlValue::from(event.time)),
                       ("submit_num", SqlValue::from(event.submit_num)),
                       ("event", SqlValue::from(event.event)),
                       ("message", SqlValue::from(event.message))]);
    }

    pub fn put_insert_task_jobs(&mut self, job: TaskJobsInsert) {
        self.inserts_map
            .entry(TABLE_TASK_JOBS)
            .or_default()
            .push(vec![("cycle", SqlValue::from(job.cycle)),
                       ("name", SqlValue::from(job.name)),
                       ("submit_num", SqlValue::from(job.submit_num)),
                       ("flow_nums", SqlValue::from(job.flow_nums)),
                       ("is_manual_submit", SqlValue::from(job.is_manual_submit as i64)),
                       ("try_num", SqlValue::from(job.try_num)),
                       ("time_submit", SqlValue::from(job.time_submit)),
                       ("platform_name", SqlValue::from(job.platform_name)),
                       ("job_runner_name", SqlValue::from(job.job_runner_name)),
                       ("job_id", sql_opt(job.job_id))]);
    }

    pub fn put_update_task_jobs(&mut self,
                                cycle: &str,
                                name: &str,
                                submit_num: i64,
                                set_args: Vec<(&'static str, SqlValue)>) {
        self.updates_map
            .entry(TABLE_TASK_JOBS)
            .or_default()
            .push((set_args,
                   vec![("cycle", SqlValue::from(cycle.to_string())),
                        ("name", SqlValue::from(name.to_string())),
                        ("submit_num", SqlValue::from(submit_num))]));
    }

    pub fn put_insert_task_late_flags(&mut self, cycle: &str, name: &str) {
        self.inserts_map
            .entry(TABLE_TASK_LATE_FLAGS)
            .or_default()
            .push(vec![("cycle", SqlValue::from(cycle.to_string())),
                       ("name", SqlValue::from(name.to_string())),
                       ("value", SqlValue::from(1i64))]);
    }

    pub fn put_insert_abs_output(&mut self, cycle: &str, name: &str, output: &str) {
        self.inserts_map
            .entry(TABLE_ABS_OUTPUTS)
            .or_default()
            .push(vec![("cycle", SqlValue::from(cycle.to_string())),
                       ("name", SqlValue::from(name.to_string())),
                       ("output", SqlValue::from(output.to_string()))]);
    }

    pub fn put_insert_workflow_flows(&mut self, flow_num: i64, start_time: &str, description: &str) {
        self.inserts_map
            .entry(TABLE_WORKFLOW_FLOWS)
            .or_default()
            .push(vec![("flow_num", SqlValue::from(flow_num)),
                       ("start_time", SqlValue::from(start_time.to_string())),
                       ("description", SqlValue::from(description.to_string()))]);
    }

    /// Reemplaza los timers de retry/handler persistidos.
    pub fn put_task_event_timers(&mut self, timers: &[ActionTimerInsert]) {
        self.deletes_map.insert(TABLE_TASK_ACTION_TIMERS, vec![Vec::new()]);
        self.inserts_map.insert(TABLE_TASK_ACTION_TIMERS,
                                timers.iter()
                                      .map(|t| {
                                          vec![("cycle", SqlValue::from(t.cycle.clone())),
                                               ("name", SqlValue::from(t.name.clone())),
                                               ("ctx_key", SqlValue::from(t.ctx_key.clone())),
                                               ("ctx", sql_opt(t.ctx.clone())),
                                               ("delays", sql_opt(t.delays.clone())),
                                               ("num", t.num.map(SqlValue::from).unwrap_or(SqlValue::Null)),
                                               ("delay", sql_opt(t.delay.clone())),
                                               ("timeout", sql_opt(t.timeout.clone()))]
                                      })
                                      .collect());
    }

    // ----- compatibilidad y upgrades ------------------------------------

    /// Versión con la que se escribió la DB por última vez.
    fn last_run_version(dao: &mut WorkflowDao) -> Result<Version, ServiceFileError> {
        let value = dao.select_workflow_param(KEY_VERSION)
                       .map_err(|e| ServiceFileError(format!("workflow database is corrupted: {e}")))?;
        let raw = value.ok_or_else(|| {
                           ServiceFileError("workflow database has no recorded scheduler version, or is corrupted".into())
                       })?;
        parse_version(&raw).ok_or_else(|| ServiceFileError(format!("unparseable scheduler version: {raw}")))
    }

    /// Rechaza DBs de versiones anteriores al primer esquema estable. No
    /// escribe nada.
    pub fn check_workflow_db_compatibility(db_file: &Path) -> Result<Version, ServiceFileError> {
        if !db_file.is_file() {
            return Err(ServiceFileError(format!("database not found: {}", db_file.display())));
        }
        let mut dao = WorkflowDao::new(db_file, false, false)
            .map_err(|e| ServiceFileError(format!("cannot open workflow database: {e}")))?;
        let last_run = Self::last_run_version(&mut dao)?;
        let incompat = parse_version(RESTART_INCOMPAT_VERSION).expect("const version");
        if last_run < incompat {
            return Err(ServiceFileError(format!(
                "workflow database is incompatible with this scheduler \
                 (workflow last run with version {last_run})"
            )));
        }
        Ok(last_run)
    }

    /// Aplica, en orden, los parches de esquema pendientes. Cada parche es
    /// idempotente: comprueba la columna antes de agregarla.
    pub fn upgrade(db_file: &Path) -> Result<(), ServiceFileError> {
        let mut dao = WorkflowDao::new(db_file, false, true)
            .map_err(|e| ServiceFileError(format!("cannot open workflow database: {e}")))?;
        let last_run = Self::last_run_version(&mut dao)?;
        if last_run < parse_version("0.4.2").expect("const version") {
            Self::upgrade_pre_042(&mut dao)?;
        }
        if last_run < parse_version("0.5.0").expect("const version") {
            Self::upgrade_pre_050(&mut dao)?;
        }
        if last_run < parse_version("0.6.0").expect("const version") {
            Self::upgrade_pre_060(&mut dao)?;
        }
        if last_run < parse_version("0.8.0").expect("const version") {
            Self::upgrade_pre_080(&mut dao)?;
        }
        Ok(())
    }

    /// pre-0.4.2: columna `is_manual_submit` en `task_states`.
    fn upgrade_pre_042(dao: &mut WorkflowDao) -> Result<(), ServiceFileError> {
        add_column_if_missing(dao,
                              TABLE_TASK_STATES,
                              "is_manual_submit",
                              "INTEGER DEFAULT 0 NOT NULL",
                              "0.4.2")
    }

    /// pre-0.5.0: las columnas `spawned` y `hold_swap` de `task_states`
    /// quedaron obsoletas con el spawn-on-demand; la tabla se reconstruye
    /// sin ellas.
    fn upgrade_pre_050(dao: &mut WorkflowDao) -> Result<(), ServiceFileError> {
        let columns = dao.table_columns(TABLE_TASK_STATES)
                         .map_err(|e| ServiceFileError(e.to_string()))?;
        let legacy: Vec<&str> = ["spawned", "hold_swap"].into_iter()
                                                        .filter(|c| columns.iter().any(|have| have == c))
                                                        .collect();
        if legacy.is_empty() {
            return Ok(());
        }
        info!("DB upgrade (pre-0.5.0): drop {legacy:?} columns from {TABLE_TASK_STATES}");
        dao.remove_columns(TABLE_TASK_STATES, &legacy)
           .map_err(|e| ServiceFileError(e.to_string()))
    }

    /// pre-0.6.0: columna `flow_nums` en `task_jobs`. Sólo es posible si la
    /// historia tiene una única serialización de flows; con varias no hay
    /// asignación segura.
    fn upgrade_pre_060(dao: &mut WorkflowDao) -> Result<(), ServiceFileError> {
        let columns = dao.table_columns(TABLE_TASK_JOBS)
                         .map_err(|e| ServiceFileError(e.to_string()))?;
        if columns.iter().any(|c| c == "flow_nums") {
            return Ok(());
        }
        let distinct = dao.select_distinct_flow_nums()
                          .map_err(|e| ServiceFileError(e.to_string()))?;
        if distinct.len() > 1 {
            return Err(ServiceFileError(format!(
                "cannot upgrade-restart: task history spans {} distinct flow sets; \
                 restart from an unupgraded copy of the database",
                distinct.len()
            )));
        }
        info!("DB upgrade (pre-0.6.0): add flow_nums column to {TABLE_TASK_JOBS}");
        dao.execute_sql(&format!("ALTER TABLE {TABLE_TASK_JOBS} ADD COLUMN flow_nums DEFAULT '[1]'"))
           .map_err(|e| ServiceFileError(e.to_string()))
    }

    /// pre-0.8.0: columna `is_complete` en `task_states`.
    fn upgrade_pre_080(dao: &mut WorkflowDao) -> Result<(), ServiceFileError> {
        add_column_if_missing(dao, TABLE_TASK_STATES, "is_complete", "INTEGER DEFAULT 0 NOT NULL", "0.8.0")
    }
}

fn add_column_if_missing(dao: &mut WorkflowDao,
                         table: &str,
                         column: &str,
                         decl: &str,
                         since: &str)
                         -> Result<(), ServiceFileError> {
    let columns = dao.table_columns(table).map_err(|e| ServiceFileError(e.to_string()))?;
    if columns.iter().any(|c| c == column) {
        return Ok(());
    }
    info!("DB upgrade (pre-{since}): add {column} column to {table}");
    dao.execute_sql(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
       .map_err(|e| ServiceFileError(e.to_string()))
}

fn sql_opt(value: Option<String>) -> SqlValue {
    value.map(SqlValue::from).unwrap_or(SqlValue::Null)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), PersistenceError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), PersistenceError> {
    Ok(())
}
