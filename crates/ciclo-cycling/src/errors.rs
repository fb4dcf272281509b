//! Errores del álgebra de ciclado.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("invalid cycle point: {0}")]
pub struct PointParsingError(pub String);

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("invalid cycle interval: {0}")]
pub struct IntervalParsingError(pub String);

/// Una secuencia es degenerada si dos puntos adyacentes coinciden (el
/// intervalo no avanza el punto). Detectado al construir la secuencia.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("sequence produces adjacent equal points: {0}")]
pub struct SequenceDegenerateError(pub String);

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("a final cycle point is required here")]
pub struct MissingFinalPointError;

/// Error agregado del crate, para llamadores que no distinguen la causa.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CyclingError {
    #[error(transparent)]
    Point(#[from] PointParsingError),
    #[error(transparent)]
    Interval(#[from] IntervalParsingError),
    #[error(transparent)]
    Degenerate(#[from] SequenceDegenerateError),
    #[error(transparent)]
    MissingFinal(#[from] MissingFinalPointError),
    #[error("point and interval belong to different cycling modes")]
    MixedModes,
}
