//! DAO del almacén del workflow: lotes de escritura y consultas de restart.
//!
//! Contrato de batching (paridad con el manager que lo alimenta):
//! - Cada tabla tiene colas de DELETE / INSERT / UPDATE; nada toca el disco
//!   hasta `execute_queued_items`.
//! - `execute_queued_items` emite primero los DELETE, luego los INSERT (un
//!   solo statement preparado por tabla), luego los UPDATE, todo dentro de
//!   una única transacción.
//! - En fallo: el DAO primario loguea la transacción encolada completa y
//!   propaga el error (fatal); el DAO público incrementa su contador de
//!   reintentos, revierte y retorna (el manager decide cuándo reconstruir la
//!   réplica).
//! - En éxito: limpia las colas y cierra la conexión. El cierre es
//!   deliberado: si el directorio de corrida desaparece, la reconexión
//!   forzada debe fallar en lugar de seguir escribiendo a un inode huérfano.

use indexmap::IndexMap;
use log::{error, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ciclo_domain::{deserialise_flow_nums, serialise_flow_nums, FlowNums};

use crate::error::PersistenceError;
use crate::schema;

/// Timeout de espera ante locks. Corto: la réplica pública tolera perder un
/// ciclo de escritura y reintenta.
const BUSY_TIMEOUT: Duration = Duration::from_millis(200);

/// Metadatos de un flow tal como se leen de `workflow_flows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMetadataRow {
    pub start_time: String,
    pub description: String,
}

/// Instancia previa de una tarea en `task_states`. El merge de flows puede
/// producir varias filas para el mismo submit number.
#[derive(Debug, Clone)]
pub struct PrevInstanceRow {
    pub submit_num: i64,
    pub flow_wait: bool,
    pub flow_nums: FlowNums,
    pub status: String,
}

/// Fila del join de restart: todo lo necesario para reconstituir una
/// instancia del pool.
#[derive(Debug, Clone)]
pub struct TaskPoolRestartRow {
    pub cycle: String,
    pub name: String,
    pub flow_nums: String,
    pub flow_wait: bool,
    pub is_manual_submit: bool,
    pub is_late: bool,
    pub status: String,
    pub is_held: bool,
    pub submit_num: i64,
    pub try_num: Option<i64>,
    pub platform_name: Option<String>,
    pub time_submit: Option<String>,
    pub time_run: Option<String>,
    pub timeout: Option<f64>,
    pub outputs: Option<String>,
}

/// Fila de `task_action_timers` para el restart.
#[derive(Debug, Clone)]
pub struct TaskActionTimerRow {
    pub cycle: String,
    pub name: String,
    pub ctx_key: String,
    pub ctx: Option<String>,
    pub delays: Option<String>,
    pub num: Option<i64>,
    pub delay: Option<String>,
    pub timeout: Option<String>,
}

/// Acceso al archivo SQLite con colas de escritura por tabla.
pub struct WorkflowDao {
    db_path: PathBuf,
    is_public: bool,
    conn: Option<Connection>,
    /// Reintentos consecutivos fallidos (sólo DAO público).
    pub n_tries: u32,
    delete_queues: IndexMap<String, Vec<Vec<SqlValue>>>,
    insert_queues: IndexMap<&'static str, Vec<Vec<SqlValue>>>,
    update_queues: IndexMap<String, Vec<Vec<SqlValue>>>,
}

impl WorkflowDao {
    /// Reintentos consecutivos tras los cuales el manager reconstruye la
    /// réplica pública desde la primaria.
    pub const MAX_TRIES: u32 = 100;

    pub fn new(db_path: impl AsRef<Path>, is_public: bool, create_tables: bool) -> Result<Self, PersistenceError> {
        let mut dao = Self { db_path: db_path.as_ref().to_path_buf(),
                             is_public,
                             conn: None,
                             n_tries: 0,
                             delete_queues: IndexMap::new(),
                             insert_queues: IndexMap::new(),
                             update_queues: IndexMap::new() };
        if create_tables {
            dao.create_tables()?;
        }
        Ok(dao)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    fn connect(&mut self) -> Result<&mut Connection, PersistenceError> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.db_path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            self.conn = Some(conn);
        }
        Ok(self.conn.as_mut().expect("connection just opened"))
    }

    /// Abre en sólo-lectura (consultas de restart sobre una DB ajena).
    pub fn connect_read_only(path: &Path, busy_timeout: Duration) -> Result<Connection, PersistenceError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(busy_timeout)?;
        Ok(conn)
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_conn, err)) = conn.close() {
                log::debug!("error closing connection to {}: {err}", self.db_path.display());
            }
        }
    }

    /// Crea las tablas que falten. Idempotente.
    pub fn create_tables(&mut self) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let mut existing: Vec<String> = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type==? ORDER BY name")?;
            let rows = stmt.query_map(["table"], |row| row.get::<_, String>(0))?;
            for row in rows {
                existing.push(row?);
            }
        }
        for table in schema::TABLES {
            if !existing.iter().any(|n| n == table.name) {
                conn.execute(&table.create_stmt(), [])?;
            }
        }
        Ok(())
    }

    // ----- colas de escritura -------------------------------------------

    /// Encola un DELETE. `where_args` vacío borra la tabla completa.
    pub fn add_delete_item(&mut self, table_name: &str, where_args: &[(&str, SqlValue)]) {
        let stmt = if where_args.is_empty() {
            format!("DELETE FROM {table_name}")
        } else {
            let conds: Vec<String> = where_args.iter().map(|(c, _)| format!("{c}==?")).collect();
            format!("DELETE FROM {table_name} WHERE {}", conds.join(" AND "))
        };
        let args: Vec<SqlValue> = where_args.iter().map(|(_, v)| v.clone()).collect();
        self.delete_queues.entry(stmt).or_default().push(args);
    }

    /// Encola un INSERT con args nombrados; las columnas ausentes quedan en
    /// NULL.
    pub fn add_insert_item(&mut self, table_name: &str, args: &[(&str, SqlValue)]) {
        let table = schema::table(table_name);
        let mut row = vec![SqlValue::Null; table.columns.len()];
        for (name, value) in args {
            if let Some(idx) = table.column_index(name) {
                row[idx] = value.clone();
            }
        }
        self.insert_queues.entry(table.name).or_default().push(row);
    }

    /// Encola un UPDATE `SET set_args WHERE where_args`.
    pub fn add_update_item(&mut self,
                           table_name: &str,
                           set_args: &[(&str, SqlValue)],
                           where_args: &[(&str, SqlValue)]) {
        let sets: Vec<String> = set_args.iter().map(|(c, _)| format!("{c}=?")).collect();
        let mut stmt = format!("UPDATE {table_name} SET {}", sets.join(", "));
        if !where_args.is_empty() {
            let conds: Vec<String> = where_args.iter().map(|(c, _)| format!("{c}==?")).collect();
            stmt.push_str(&format!(" WHERE {}", conds.join(" AND ")));
        }
        let mut args: Vec<SqlValue> = set_args.iter().map(|(_, v)| v.clone()).collect();
        args.extend(where_args.iter().map(|(_, v)| v.clone()));
        self.update_queues.entry(stmt).or_default().push(args);
    }

    pub fn has_queued_items(&self) -> bool {
        !self.delete_queues.is_empty() || !self.insert_queues.is_empty() || !self.update_queues.is_empty()
    }

    /// Ejecuta todo lo encolado en una única transacción.
    pub fn execute_queued_items(&mut self) -> Result<(), PersistenceError> {
        let mut sql_queue: Vec<(String, Vec<Vec<SqlValue>>)> = Vec::new();
        for (stmt, args) in self.delete_queues.iter() {
            sql_queue.push((stmt.clone(), args.clone()));
        }
        for (table_name, rows) in self.insert_queues.iter() {
            sql_queue.push((schema::table(table_name).insert_stmt(), rows.clone()));
        }
        for (stmt, args) in self.update_queues.iter() {
            sql_queue.push((stmt.clone(), args.clone()));
        }
        if sql_queue.is_empty() {
            return Ok(());
        }

        let result = self.run_transaction(&sql_queue);
        match result {
            Ok(()) => {
                self.delete_queues.clear();
                self.insert_queues.clear();
                self.update_queues.clear();
                if self.n_tries > 0 {
                    warn!("{}: recovered after {} attempt(s)", self.db_path.display(), self.n_tries);
                }
                self.n_tries = 0;
                self.close();
                Ok(())
            }
            Err(err) => {
                if !self.is_public {
                    error!("An error occurred when writing to the database, this is \
                            probably a filesystem issue. The attempted transaction was:\n{}",
                           pformat_queue(&sql_queue));
                    self.close();
                    return Err(err);
                }
                self.n_tries += 1;
                warn!("{}: write attempt ({}) did not complete: {err}",
                      self.db_path.display(),
                      self.n_tries);
                self.close();
                Ok(())
            }
        }
    }

    fn run_transaction(&mut self, sql_queue: &[(String, Vec<Vec<SqlValue>>)]) -> Result<(), PersistenceError> {
        let conn = self.connect()?;
        let tx = conn.transaction()?;
        for (stmt, args_list) in sql_queue {
            let mut prepared = tx.prepare(stmt)?;
            for args in args_list {
                prepared.execute(params_from_iter(args.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn vacuum(&mut self) -> Result<(), PersistenceError> {
        self.connect()?.execute("VACUUM", [])?;
        Ok(())
    }

    /// Reconstruye una tabla sin las columnas dadas (columnas legadas que
    /// el esquema actual ya no define). Las columnas que se conservan
    /// toman tipo y clave primaria del esquema actual; las desconocidas
    /// quedan como TEXT.
    pub fn remove_columns(&mut self, table_name: &str, columns: &[&str]) -> Result<(), PersistenceError> {
        let existing = self.table_columns(table_name)?;
        let keep: Vec<String> = existing.into_iter().filter(|c| !columns.contains(&c.as_str())).collect();
        let table = schema::table(table_name);
        let col_defs: Vec<String> = keep.iter()
                                        .map(|name| match table.column_index(name) {
                                            Some(idx) => {
                                                let col = &table.columns[idx];
                                                format!("{} {}", col.name, col.datatype)
                                            }
                                            None => format!("{name} TEXT"),
                                        })
                                        .collect();
        let keys: Vec<&str> = table.columns
                                   .iter()
                                   .filter(|c| c.primary_key && keep.iter().any(|k| k == c.name))
                                   .map(|c| c.name)
                                   .collect();
        let create = if keys.is_empty() {
            format!("CREATE TABLE {table_name}_new({})", col_defs.join(", "))
        } else {
            format!("CREATE TABLE {table_name}_new({}, PRIMARY KEY({}))",
                    col_defs.join(", "),
                    keys.join(", "))
        };
        let keep_csv = keep.join(", ");
        let conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(&create, [])?;
        tx.execute(&format!("INSERT INTO {table_name}_new ({keep_csv}) SELECT {keep_csv} FROM {table_name}"),
                   [])?;
        tx.execute(&format!("DROP TABLE {table_name}"), [])?;
        tx.execute(&format!("ALTER TABLE {table_name}_new RENAME TO {table_name}"), [])?;
        tx.commit()?;
        Ok(())
    }

    // ----- consultas ----------------------------------------------------

    pub fn select_workflow_params(&mut self) -> Result<Vec<(String, Option<String>)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT key, value FROM workflow_params")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_workflow_param(&mut self, key: &str) -> Result<Option<String>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT value FROM workflow_params WHERE key==?")?;
        let mut rows = stmt.query_map([key], |row| row.get::<_, Option<String>>(0))?;
        match rows.next() {
            Some(value) => Ok(value?),
            None => Ok(None),
        }
    }

    pub fn select_workflow_params_restart_count(&mut self) -> Result<i64, PersistenceError> {
        let value = self.select_workflow_param("n_restart")?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub fn select_workflow_flows(&mut self,
                                 flow_nums: &FlowNums)
                                 -> Result<IndexMap<i64, FlowMetadataRow>, PersistenceError> {
        if flow_nums.is_empty() {
            return Ok(IndexMap::new());
        }
        let in_list = ciclo_domain::stringify_flow_nums(flow_nums);
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT flow_num, start_time, description FROM workflow_flows WHERE flow_num IN ({in_list})"
        ))?;
        let rows = stmt.query_map([], |row| {
                           Ok((row.get::<_, i64>(0)?,
                               FlowMetadataRow { start_time: row.get(1)?,
                                                 description: row.get(2)? }))
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_workflow_flows_max_flow_num(&mut self) -> Result<i64, PersistenceError> {
        let conn = self.connect()?;
        let max: Option<i64> = conn.query_row("SELECT MAX(flow_num) FROM workflow_flows", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    /// Instancias previas de `(name, cycle)` en `task_states`.
    pub fn select_prev_instances(&mut self, name: &str, cycle: &str) -> Result<Vec<PrevInstanceRow>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT flow_nums, submit_num, flow_wait, status FROM task_states WHERE name==? AND cycle==?")?;
        let rows = stmt.query_map([name, cycle], |row| {
                           Ok(PrevInstanceRow { flow_nums: deserialise_flow_nums(&row.get::<_, String>(0)?),
                                                submit_num: row.get(1)?,
                                                flow_wait: row.get::<_, Option<i64>>(2)?.unwrap_or(0) == 1,
                                                status: row.get(3)? })
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Flows de la tarea no-none creada más recientemente.
    pub fn select_latest_flow_nums(&mut self) -> Result<Option<FlowNums>, PersistenceError> {
        let none_flow = serialise_flow_nums(&FlowNums::new());
        let conn = self.connect()?;
        let latest: Option<String> = conn.query_row(
            "SELECT flow_nums, MAX(time_created) FROM task_states WHERE flow_nums != ?",
            [none_flow],
            |row| row.get(0),
        )?;
        Ok(latest.map(|s| deserialise_flow_nums(&s)).filter(|s| !s.is_empty()))
    }

    /// Outputs completados por flow: `(outputs_json, flow_nums)` por fila.
    pub fn select_task_outputs(&mut self, name: &str, cycle: &str) -> Result<Vec<(String, FlowNums)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT flow_nums, outputs FROM task_outputs WHERE name==? AND cycle==?")?;
        let rows = stmt.query_map([name, cycle], |row| {
                           Ok((row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                               deserialise_flow_nums(&row.get::<_, String>(0)?)))
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Join de restart: pool × states × late flags × último job × timeout ×
    /// outputs. Una fila por entrada del pool.
    pub fn select_task_pool_for_restart(&mut self) -> Result<Vec<TaskPoolRestartRow>, PersistenceError> {
        const STMT: &str = "
            SELECT
                task_pool.cycle,
                task_pool.name,
                task_pool.flow_nums,
                task_states.flow_wait,
                task_states.is_manual_submit,
                task_late_flags.value,
                task_pool.status,
                task_pool.is_held,
                task_states.submit_num,
                task_jobs.try_num,
                task_jobs.platform_name,
                task_jobs.time_submit,
                task_jobs.time_run,
                task_timeout_timers.timeout,
                task_outputs.outputs
            FROM
                task_pool
            JOIN
                task_states
            ON  task_pool.cycle == task_states.cycle AND
                task_pool.name == task_states.name AND
                task_pool.flow_nums == task_states.flow_nums
            LEFT OUTER JOIN
                task_late_flags
            ON  task_pool.cycle == task_late_flags.cycle AND
                task_pool.name == task_late_flags.name
            LEFT OUTER JOIN
                task_jobs
            ON  task_pool.cycle == task_jobs.cycle AND
                task_pool.name == task_jobs.name AND
                task_states.submit_num == task_jobs.submit_num
            LEFT OUTER JOIN
                task_timeout_timers
            ON  task_pool.cycle == task_timeout_timers.cycle AND
                task_pool.name == task_timeout_timers.name
            LEFT OUTER JOIN
                task_outputs
            ON  task_pool.cycle == task_outputs.cycle AND
                task_pool.name == task_outputs.name AND
                task_pool.flow_nums == task_outputs.flow_nums";
        let conn = self.connect()?;
        let mut stmt = conn.prepare(STMT)?;
        let rows = stmt.query_map([], |row| {
                           Ok(TaskPoolRestartRow {
                               cycle: row.get(0)?,
                               name: row.get(1)?,
                               flow_nums: row.get(2)?,
                               flow_wait: row.get::<_, Option<i64>>(3)?.unwrap_or(0) == 1,
                               is_manual_submit: row.get::<_, Option<i64>>(4)?.unwrap_or(0) == 1,
                               is_late: row.get::<_, Option<i64>>(5)?.unwrap_or(0) == 1,
                               status: row.get(6)?,
                               is_held: row.get::<_, Option<i64>>(7)?.unwrap_or(0) == 1,
                               submit_num: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
                               try_num: row.get(9)?,
                               platform_name: row.get(10)?,
                               time_submit: row.get(11)?,
                               time_run: row.get(12)?,
                               timeout: row.get(13)?,
                               outputs: row.get(14)?,
                           })
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_task_prerequisites(&mut self,
                                     cycle: &str,
                                     name: &str,
                                     flow_nums: &str)
                                     -> Result<Vec<(String, String, String, String)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT prereq_name, prereq_cycle, prereq_output, satisfied \
             FROM task_prerequisites WHERE cycle==? AND name==? AND flow_nums==?",
        )?;
        let rows = stmt.query_map([cycle, name, flow_nums], |row| {
                           Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_tasks_to_hold(&mut self) -> Result<Vec<(String, String)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT name, cycle FROM tasks_to_hold")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_xtriggers_for_restart(&mut self) -> Result<Vec<(String, String)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT signature, results FROM xtriggers")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_abs_outputs_for_restart(&mut self) -> Result<Vec<(String, String, String)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT cycle, name, output FROM absolute_outputs")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_task_action_timers(&mut self) -> Result<Vec<TaskActionTimerRow>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT cycle, name, ctx_key, ctx, delays, num, delay, timeout FROM task_action_timers")?;
        let rows = stmt.query_map([], |row| {
                           Ok(TaskActionTimerRow { cycle: row.get(0)?,
                                                   name: row.get(1)?,
                                                   ctx_key: row.get(2)?,
                                                   ctx: row.get(3)?,
                                                   delays: row.get(4)?,
                                                   num: row.get(5)?,
                                                   delay: row.get(6)?,
                                                   timeout: row.get(7)? })
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Tiempos de corrida de jobs exitosos agrupados por tarea, como lista
    /// separada por comas de segundos enteros. Alimenta las estimaciones de
    /// tiempo medio transcurrido en el restart.
    pub fn select_task_job_run_times(&mut self) -> Result<Vec<(String, String)>, PersistenceError> {
        const STMT: &str = "
            SELECT
                name,
                GROUP_CONCAT(
                    CAST(strftime('%s', time_run_exit) AS NUMERIC) -
                    CAST(strftime('%s', time_run) AS NUMERIC))
            FROM task_jobs
            WHERE run_status==0 GROUP BY name ORDER BY time_run_exit";
        let conn = self.connect()?;
        let mut stmt = conn.prepare(STMT)?;
        let rows = stmt.query_map([], |row| {
                           Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_broadcast_states(&mut self)
                                   -> Result<Vec<(String, String, String, String)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT point, namespace, key, value FROM broadcast_states ORDER BY point ASC, namespace ASC, key ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_workflow_template_vars(&mut self) -> Result<Vec<(String, String)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT key, value FROM workflow_template_vars")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn select_task_pool(&mut self) -> Result<Vec<(String, String, String, bool)>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT cycle, name, status, is_held FROM task_pool")?;
        let rows = stmt.query_map([], |row| {
                           Ok((row.get(0)?,
                               row.get(1)?,
                               row.get(2)?,
                               row.get::<_, Option<i64>>(3)?.unwrap_or(0) == 1))
                       })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Serializaciones distintas de `flow_nums` en `task_states` (guardia de
    /// upgrade multi-flow).
    pub fn select_distinct_flow_nums(&mut self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT DISTINCT flow_nums FROM task_states")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Acceso directo para los upgrades de esquema del manager.
    pub fn execute_sql(&mut self, sql: &str) -> Result<(), PersistenceError> {
        self.connect()?.execute_batch(sql)?;
        Ok(())
    }

    /// Columnas presentes en una tabla del archivo (puede diferir del
    /// esquema actual en DBs viejas).
    pub fn table_columns(&mut self, table_name: &str) -> Result<Vec<String>, PersistenceError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table_name})"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

impl Drop for WorkflowDao {
    fn drop(&mut self) {
        self.close();
    }
}

// Volcado legible de la transacción encolada, para el log de errores del
// DAO primario.
fn pformat_queue(sql_queue: &[(String, Vec<Vec<SqlValue>>)]) -> String {
    let mut out = String::new();
    for (stmt, args_list) in sql_queue {
        out.push_str(&format!("stmt={}\n", stmt.trim()));
        for (i, args) in args_list.iter().enumerate() {
            out.push_str(&format!("  args[{i}]={args:?}\n"));
        }
    }
    out
}
