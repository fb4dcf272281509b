//! Errores de persistencia.
//! Mapea errores de rusqlite / conexión a variantes semánticas de la capa.

use rusqlite::Error as SqliteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("not found")]
    NotFound,
    #[error("database busy/locked (retryable): {0}")]
    Busy(String),
    #[error("transient IO error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl PersistenceError {
    /// ¿Conviene reintentar (backoff) esta falla en la réplica pública?
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Busy(_) | PersistenceError::TransientIo(_))
    }
}

impl From<SqliteError> for PersistenceError {
    fn from(err: SqliteError) -> Self {
        match &err {
            SqliteError::QueryReturnedNoRows => Self::NotFound,
            SqliteError::SqliteFailure(code, message) => {
                let text = message.clone().unwrap_or_else(|| code.to_string());
                match code.code {
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => Self::Busy(text),
                    rusqlite::ErrorCode::ConstraintViolation => {
                        if text.contains("UNIQUE") {
                            Self::UniqueViolation(text)
                        } else {
                            Self::ConstraintViolation(text)
                        }
                    }
                    rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::ReadOnly | rusqlite::ErrorCode::DiskFull => {
                        Self::TransientIo(text)
                    }
                    _ => Self::Unknown(text),
                }
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::TransientIo(err.to_string())
    }
}
