//! ciclo-domain: tipos de dominio del scheduler cíclico
//!
//! Propósito:
//! - Proveer los contratos neutrales que comparten el pool de tareas, la capa
//!   de persistencia y las herramientas de consulta: estados, outputs,
//!   prerequisitos, definiciones de tarea e identificadores.
//! - Ningún tipo de este crate conoce la base de datos ni el pool; sólo
//!   describe datos y sus invariantes locales.
//!
//! Componentes principales:
//! - `status`: máquina de estados de una instancia de tarea.
//! - `outputs`: mapa `label → (mensaje, completado)` con outputs estándar.
//! - `prereq`: prerequisitos `(punto, tarea, output) → satisfecho`.
//! - `taskdef`: definición de tarea (recurrencias, hijos por output,
//!   offsets) más su builder; hace de contrato con el parser de grafo
//!   externo.
//! - `flownums`: conjuntos de números de flow y sus serializaciones.
//! - `ident`: parseo de identificadores `user/workflow//cycle/task:sel/job`.
//! - `hashing`: JSON canónico + SHA-256 para firmas y fingerprints.
//! - `errors`: taxonomía de errores esperados del dominio.

pub mod errors;
pub mod flownums;
pub mod hashing;
pub mod ident;
pub mod outputs;
pub mod prereq;
pub mod status;
pub mod taskdef;

pub use errors::{InputError, PlatformLookupError, ServiceFileError, WorkflowConfigError, WorkflowError};
pub use flownums::{deserialise_flow_nums, repr_flow_nums, serialise_flow_nums, stringify_flow_nums, FlowNums};
pub use hashing::{hash_str, hash_value, to_canonical_json};
pub use ident::Tokens;
pub use outputs::{TaskOutputs, OUT_EXPIRED, OUT_FAILED, OUT_STARTED, OUT_SUBMITTED, OUT_SUCCEEDED};
pub use prereq::{PrereqKey, PrereqState, Prerequisite};
pub use status::TaskStatus;
pub use taskdef::{GraphChild, GraphParent, TaskDef, TaskDefBuilder};
