//! Puntos de ciclo: token ordenado con dos regímenes (entero y datetime).
//!
//! Rol en el scheduler:
//! - Cada instancia de tarea vive en un punto de ciclo; el pool se indexa por
//!   punto y el governor de runahead compara puntos.
//! - La representación textual (formato de punto) es configurable por
//!   workflow; la base de datos persiste siempre la forma canónica
//!   (`to_db_string`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{CyclingError, PointParsingError};
use crate::interval::CycleInterval;

/// Régimen de ciclado del workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclingMode {
    Integer,
    DateTime,
}

/// Formato de salida para puntos datetime. El default es la forma compacta
/// `CCYYMMDDThhmmZ`; los workflows pueden fijar otra con `with_format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointFormat(pub &'static str);

impl Default for PointFormat {
    fn default() -> Self {
        PointFormat("%Y%m%dT%H%MZ")
    }
}

/// Token ordenado y opaco: posición en la secuencia de recurrencias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CyclePoint {
    Integer(i64),
    DateTime(DateTime<Utc>),
}

impl CyclePoint {
    pub fn mode(&self) -> CyclingMode {
        match self {
            CyclePoint::Integer(_) => CyclingMode::Integer,
            CyclePoint::DateTime(_) => CyclingMode::DateTime,
        }
    }

    /// Forma canónica persistida en la base de datos. Estable entre
    /// versiones: las filas de `task_pool`/`task_states` se reconcilian por
    /// esta cadena en el restart.
    pub fn to_db_string(&self) -> String {
        self.to_string()
    }

    /// Representación con un formato explícito (sólo afecta datetime).
    pub fn format_with(&self, format: &PointFormat) -> String {
        match self {
            CyclePoint::Integer(i) => i.to_string(),
            CyclePoint::DateTime(dt) => dt.format(format.0).to_string(),
        }
    }

    /// Suma de un intervalo. `MixedModes` si los regímenes no coinciden.
    pub fn add(&self, interval: &CycleInterval) -> Result<CyclePoint, CyclingError> {
        match (self, interval) {
            (CyclePoint::Integer(i), CycleInterval::Integer(n)) => Ok(CyclePoint::Integer(i + n)),
            (CyclePoint::DateTime(dt), CycleInterval::Duration(d)) => Ok(CyclePoint::DateTime(d.add_to(*dt))),
            _ => Err(CyclingError::MixedModes),
        }
    }

    pub fn sub(&self, interval: &CycleInterval) -> Result<CyclePoint, CyclingError> {
        self.add(&interval.negated())
    }

    /// Segundos desde el epoch para el punto (los puntos enteros no tienen
    /// instante asociado y devuelven None). Usado por el cálculo de expiry.
    pub fn epoch_seconds(&self) -> Option<i64> {
        match self {
            CyclePoint::Integer(_) => None,
            CyclePoint::DateTime(dt) => Some(dt.timestamp()),
        }
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePoint::Integer(i) => write!(f, "{i}"),
            CyclePoint::DateTime(dt) => write!(f, "{}", dt.format(PointFormat::default().0)),
        }
    }
}

// Formatos datetime aceptados en entrada. Orden: de más específico a más
// laxo; el primero que parsea gana.
const DATETIME_FORMATS: &[&str] = &["%Y%m%dT%H%M%SZ",
                                    "%Y%m%dT%H%MZ",
                                    "%Y-%m-%dT%H:%M:%SZ",
                                    "%Y-%m-%dT%H:%MZ",
                                    "%Y%m%dT%H%M",
                                    "%Y-%m-%dT%H:%M"];

const DATE_FORMATS: &[&str] = &["%Y%m%d", "%Y-%m-%d"];

/// Parsea un punto en el régimen indicado.
///
/// Entero: un `i64` en base 10 (con signo opcional).
/// Datetime: ISO-8601 en forma básica o extendida, con hora opcional; un año
/// a secas (`2024`) se interpreta como el 1 de enero a medianoche UTC.
pub fn parse_point(value: &str, mode: CyclingMode) -> Result<CyclePoint, PointParsingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PointParsingError("empty point".into()));
    }
    match mode {
        CyclingMode::Integer => value.parse::<i64>()
                                     .map(CyclePoint::Integer)
                                     .map_err(|_| PointParsingError(value.into())),
        CyclingMode::DateTime => parse_datetime_point(value),
    }
}

fn parse_datetime_point(value: &str) -> Result<CyclePoint, PointParsingError> {
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(CyclePoint::DateTime(Utc.from_utc_datetime(&naive)));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| PointParsingError(value.into()))?;
            return Ok(CyclePoint::DateTime(Utc.from_utc_datetime(&naive)));
        }
    }
    // Año a secas: exactamente 4 dígitos.
    if value.len() == 4 && value.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = value.parse().map_err(|_| PointParsingError(value.into()))?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| PointParsingError(value.into()))?;
            return Ok(CyclePoint::DateTime(Utc.from_utc_datetime(&naive)));
        }
    }
    Err(PointParsingError(value.into()))
}

/// Aplica un offset textual con signo opcional (`+`/`-`) a un punto.
///
/// El cuerpo del offset es un entero plano en ciclado entero, o una duración
/// ISO-8601 (`P…T…`) en ciclado datetime.
pub fn add_offset(point: &CyclePoint, offset: &str) -> Result<CyclePoint, CyclingError> {
    let offset = offset.trim();
    let (negative, body) = match offset.as_bytes().first() {
        Some(b'-') => (true, &offset[1..]),
        Some(b'+') => (false, &offset[1..]),
        _ => (false, offset),
    };
    let interval = crate::interval::parse_interval(body, point.mode())?;
    if negative {
        point.sub(&interval)
    } else {
        point.add(&interval)
    }
}
