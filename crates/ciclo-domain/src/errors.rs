//! Taxonomía de errores esperados del scheduler.
//!
//! Política general: el usuario ve una sola línea de causa; los errores de
//! dominio nunca desenrollan con panic. Cada variante corresponde a un modo
//! de fallo con propagación propia (ver también `PersistenceError` en el
//! crate de persistencia).

use thiserror::Error;

/// Argumentos/ids/strings de flow o ciclo inválidos. Se muestra al usuario y
/// la CLI sale con código 1.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("{0}")]
pub struct InputError(pub String);

/// Definiciones de tarea ausentes o inconsistentes en reload/restart. Se
/// loguea y la tarea afectada se omite.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("workflow config error: {0}")]
pub struct WorkflowConfigError(pub String);

/// Base de datos incompatible o archivos de servicio corruptos. Fatal al
/// arrancar.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("service file error: {0}")]
pub struct ServiceFileError(pub String);

/// El restart referencia plataformas desconocidas. Fatal; lista todas las
/// plataformas faltantes, no sólo la primera.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("platform lookup failed for: {}", platforms.join(", "))]
pub struct PlatformLookupError {
    pub platforms: Vec<String>,
}

/// Error agregado para llamadores que cruzan capas.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Config(#[from] WorkflowConfigError),
    #[error(transparent)]
    Service(#[from] ServiceFileError),
    #[error(transparent)]
    Platform(#[from] PlatformLookupError),
    #[error(transparent)]
    Cycling(#[from] ciclo_cycling::CyclingError),
    #[error("{0}")]
    Other(String),
}
