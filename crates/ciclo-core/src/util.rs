//! Utilidades menores compartidas por el kernel.

use chrono::Utc;

/// Timestamp ISO con segundos, la forma que persisten todas las tablas.
pub fn now_time_string() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Segundos de reloj desde el epoch (los tests de expiry lo inyectan).
pub fn wallclock_seconds() -> i64 {
    Utc::now().timestamp()
}
