//! Esquema del almacén del workflow (generado a mano; la compatibilidad
//! hacia adelante es sólo por columnas aditivas).
//!
//! Tablas:
//! - `workflow_params`: estado escalar del workflow (UUID, versión, puntos
//!   de stop/hold, contador de restarts, …).
//! - `workflow_flows`: metadatos inmutables por flow.
//! - `task_pool` / `task_states` / `task_outputs` / `task_prerequisites`:
//!   snapshot e historia del pool en vivo.
//! - `task_jobs` / `task_events`: registros por submission y log de eventos.
//! - tablas auxiliares: timers, banderas de lateness, xtriggers memoizados,
//!   outputs absolutos y holds futuros.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableColumn {
    pub name: &'static str,
    pub datatype: &'static str,
    pub primary_key: bool,
}

const fn col(name: &'static str) -> TableColumn {
    TableColumn { name, datatype: "TEXT", primary_key: false }
}

const fn pk(name: &'static str) -> TableColumn {
    TableColumn { name, datatype: "TEXT", primary_key: true }
}

const fn int_col(name: &'static str) -> TableColumn {
    TableColumn { name, datatype: "INTEGER", primary_key: false }
}

const fn int_pk(name: &'static str) -> TableColumn {
    TableColumn { name, datatype: "INTEGER", primary_key: true }
}

const fn real_col(name: &'static str) -> TableColumn {
    TableColumn { name, datatype: "REAL", primary_key: false }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [TableColumn],
}

impl TableSchema {
    pub fn create_stmt(&self) -> String {
        let columns: Vec<String> = self.columns
                                       .iter()
                                       .map(|c| format!("{} {}", c.name, c.datatype))
                                       .collect();
        let keys: Vec<&str> = self.columns
                                  .iter()
                                  .filter(|c| c.primary_key)
                                  .map(|c| c.name)
                                  .collect();
        if keys.is_empty() {
            format!("CREATE TABLE {}({})", self.name, columns.join(", "))
        } else {
            format!("CREATE TABLE {}({}, PRIMARY KEY({}))",
                    self.name,
                    columns.join(", "),
                    keys.join(", "))
        }
    }

    pub fn insert_stmt(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        let holes = vec!["?"; names.len()].join(", ");
        format!("INSERT OR REPLACE INTO {} ({}) VALUES ({})", self.name, names.join(", "), holes)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

pub const TABLE_WORKFLOW_PARAMS: &str = "workflow_params";
pub const TABLE_WORKFLOW_FLOWS: &str = "workflow_flows";
pub const TABLE_WORKFLOW_TEMPLATE_VARS: &str = "workflow_template_vars";
pub const TABLE_INHERITANCE: &str = "inheritance";
pub const TABLE_BROADCAST_STATES: &str = "broadcast_states";
pub const TABLE_BROADCAST_EVENTS: &str = "broadcast_events";
pub const TABLE_TASK_POOL: &str = "task_pool";
pub const TABLE_TASK_STATES: &str = "task_states";
pub const TABLE_TASK_JOBS: &str = "task_jobs";
pub const TABLE_TASK_EVENTS: &str = "task_events";
pub const TABLE_TASK_OUTPUTS: &str = "task_outputs";
pub const TABLE_TASK_PREREQUISITES: &str = "task_prerequisites";
pub const TABLE_TASK_ACTION_TIMERS: &str = "task_action_timers";
pub const TABLE_TASK_TIMEOUT_TIMERS: &str = "task_timeout_timers";
pub const TABLE_TASK_LATE_FLAGS: &str = "task_late_flags";
pub const TABLE_XTRIGGERS: &str = "xtriggers";
pub const TABLE_ABS_OUTPUTS: &str = "absolute_outputs";
pub const TABLE_TASKS_TO_HOLD: &str = "tasks_to_hold";

pub static TABLES: &[TableSchema] = &[
    TableSchema { name: TABLE_WORKFLOW_PARAMS,
                  columns: &[pk("key"), col("value")] },
    TableSchema { name: TABLE_WORKFLOW_FLOWS,
                  columns: &[int_pk("flow_num"), col("start_time"), col("description")] },
    TableSchema { name: TABLE_WORKFLOW_TEMPLATE_VARS,
                  columns: &[pk("key"), col("value")] },
    TableSchema { name: TABLE_INHERITANCE,
                  columns: &[pk("namespace"), col("inheritance")] },
    TableSchema { name: TABLE_BROADCAST_STATES,
                  columns: &[pk("point"), pk("namespace"), pk("key"), col("value")] },
    TableSchema { name: TABLE_BROADCAST_EVENTS,
                  columns: &[col("time"), col("change"), col("point"), col("namespace"), col("key"), col("value")] },
    TableSchema { name: TABLE_TASK_POOL,
                  columns: &[pk("cycle"), pk("name"), pk("flow_nums"), col("status"), int_col("is_held")] },
    TableSchema { name: TABLE_TASK_STATES,
                  columns: &[pk("name"),
                             pk("cycle"),
                             pk("flow_nums"),
                             col("time_created"),
                             col("time_updated"),
                             int_col("submit_num"),
                             col("status"),
                             int_col("flow_wait"),
                             int_col("is_manual_submit"),
                             int_col("is_complete")] },
    TableSchema { name: TABLE_TASK_JOBS,
                  columns: &[pk("cycle"),
                             pk("name"),
                             int_pk("submit_num"),
                             col("flow_nums"),
                             int_col("is_manual_submit"),
                             int_col("try_num"),
                             col("time_submit"),
                             col("time_submit_exit"),
                             int_col("submit_status"),
                             col("time_run"),
                             col("time_run_exit"),
                             col("run_signal"),
                             int_col("run_status"),
                             col("platform_name"),
                             col("job_runner_name"),
                             col("job_id")] },
    TableSchema { name: TABLE_TASK_EVENTS,
                  columns: &[col("name"), col("cycle"), col("time"), int_col("submit_num"), col("event"), col("message")] },
    TableSchema { name: TABLE_TASK_OUTPUTS,
                  columns: &[pk("cycle"), pk("name"), pk("flow_nums"), col("outputs")] },
    TableSchema { name: TABLE_TASK_PREREQUISITES,
                  columns: &[pk("cycle"),
                             pk("name"),
                             pk("flow_nums"),
                             pk("prereq_name"),
                             pk("prereq_cycle"),
                             pk("prereq_output"),
                             col("satisfied")] },
    TableSchema { name: TABLE_TASK_ACTION_TIMERS,
                  columns: &[pk("cycle"),
                             pk("name"),
                             pk("ctx_key"),
                             col("ctx"),
                             col("delays"),
                             int_col("num"),
                             col("delay"),
                             col("timeout")] },
    TableSchema { name: TABLE_TASK_TIMEOUT_TIMERS,
                  columns: &[pk("cycle"), pk("name"), real_col("timeout")] },
    TableSchema { name: TABLE_TASK_LATE_FLAGS,
                  columns: &[pk("cycle"), pk("name"), int_col("value")] },
    TableSchema { name: TABLE_XTRIGGERS,
                  columns: &[pk("signature"), col("results")] },
    TableSchema { name: TABLE_ABS_OUTPUTS,
                  columns: &[col("cycle"), col("name"), col("output")] },
    TableSchema { name: TABLE_TASKS_TO_HOLD,
                  columns: &[col("name"), col("cycle")] },
];

pub fn table(name: &str) -> &'static TableSchema {
    TABLES.iter()
          .find(|t| t.name == name)
          .unwrap_or_else(|| panic!("unknown table: {name}"))
}
