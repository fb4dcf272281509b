//! cicloflow: scheduler de workflows cíclicos
//!
//! Fachada del workspace: re-exporta los crates del kernel para binarios y
//! tests de integración.
//!
//! - `ciclo-cycling`: álgebra de puntos de ciclo (entero y datetime).
//! - `ciclo-domain`: definiciones de tarea, estados, outputs,
//!   prerequisitos e identificadores.
//! - `ciclo-core`: pool de tareas, flows, runahead, colas y polling.
//! - `ciclo-persistence`: almacén SQLite (primaria + réplica pública).

pub use ciclo_core as kernel;
pub use ciclo_cycling as cycling;
pub use ciclo_domain as domain;
pub use ciclo_persistence as persistence;
