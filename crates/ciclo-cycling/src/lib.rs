//! ciclo-cycling: álgebra de puntos de ciclo
//!
//! Propósito:
//! - Proveer los tipos neutrales de ciclado (puntos, intervalos y secuencias)
//!   sobre los que el resto del scheduler razona, sin conocer tareas ni
//!   flujos.
//! - Soportar los dos regímenes de ciclado: entero y datetime (ISO-8601).
//!
//! Componentes principales:
//! - `point`: `CyclePoint`, token ordenado con representación configurable.
//! - `interval`: `CycleInterval` y duraciones ISO-8601 (`P…T…`).
//! - `sequence`: `CycleSequence`, recurrencias que producen puntos válidos
//!   sucesivos entre un punto inicial y uno final opcional.
//! - `errors`: errores de parseo y de secuencias degeneradas.

pub mod errors;
pub mod interval;
pub mod point;
pub mod sequence;

pub use errors::{CyclingError, IntervalParsingError, MissingFinalPointError, PointParsingError, SequenceDegenerateError};
pub use interval::{parse_interval, CycleInterval, IsoDuration};
pub use point::{add_offset, parse_point, CyclePoint, CyclingMode, PointFormat};
pub use sequence::CycleSequence;
