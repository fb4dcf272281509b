//! ciclo-persistence: almacén durable del workflow (SQLite primaria +
//! réplica pública)
//!
//! Propósito:
//! - Persistir pool, estados, outputs, prerequisitos, jobs, flows, timers y
//!   parámetros del workflow con batching transaccional, de modo que una
//!   corrida pueda reanudarse exactamente donde quedó.
//! - Mantener una réplica pública (0644) espejo de la primaria (0600) para
//!   lectores externos; la primaria sólo la toca el scheduler.
//!
//! Componentes principales:
//! - `schema`: DDL y listas de columnas por tabla.
//! - `dao`: colas de DELETE/INSERT/UPDATE por tabla y consultas de restart.
//! - `manager`: espejado primaria→pública, escritores stage-only y la
//!   escalera de upgrades de esquema.
//! - `checker`: consultas de sólo-lectura para polling y CLI.
//! - `paths`: layout del directorio de corrida.
//! - `version`: parseo/orden de versiones del scheduler.

pub mod checker;
pub mod dao;
pub mod error;
pub mod manager;
pub mod paths;
pub mod schema;
pub mod version;

pub use checker::{CheckerError, StateQuery, StateQueryRow, TaskTimingRow, WorkflowDbChecker};
pub use dao::{FlowMetadataRow, PrevInstanceRow, TaskActionTimerRow, TaskPoolRestartRow, WorkflowDao};
pub use error::PersistenceError;
pub use manager::{ActionTimerInsert, BroadcastSetting, PrereqInsert, TaskEventInsert, TaskJobsInsert,
                  TaskPoolSnapshotEntry, TaskStateUpdate, TaskStatesInsert, WorkflowDatabaseManager, CICLO_VERSION,
                  KEY_CYCLE_POINT_FORMAT, KEY_CYCLING_MODE, KEY_FINAL_CYCLE_POINT, KEY_HOLD_CYCLE_POINT,
                  KEY_INITIAL_CYCLE_POINT, KEY_PAUSED, KEY_RESTART_COUNT, KEY_STOP_CYCLE_POINT, KEY_STOP_TASK,
                  KEY_UTC_MODE, KEY_UUID_STR, KEY_VERSION, RESTART_INCOMPAT_VERSION};
pub use paths::{RunDirLayout, DB_FILE_BASE_NAME};
pub use version::{parse_version, Version};
