//! Layout del directorio de corrida y configuración por entorno.
//!
//! Estructura persistida por workflow:
//! ```text
//! <run-dir>/log/db                  réplica pública (0644)
//! <run-dir>/.service/db             base primaria (0600)
//! <run-dir>/log/scheduler/          logs del scheduler
//! <run-dir>/log/job/<cycle>/<name>/<submit_num>/
//! <run-dir>/share/                  datos compartidos del workflow
//! <run-dir>/work/                   directorios de trabajo por job
//! ```

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

pub const DB_FILE_BASE_NAME: &str = "db";

#[derive(Debug, Clone)]
pub struct RunDirLayout {
    pub run_dir: PathBuf,
}

impl RunDirLayout {
    pub fn new(run_dir: impl AsRef<Path>) -> Self {
        Self { run_dir: run_dir.as_ref().to_path_buf() }
    }

    /// Raíz de corridas desde el entorno: `CICLO_RUN_DIR`, con fallback a
    /// `~/ciclo-run/<workflow-id>`.
    pub fn from_env(workflow_id: &str) -> Self {
        Lazy::force(&DOTENV_LOADED);
        let base = env::var("CICLO_RUN_DIR").map(PathBuf::from).unwrap_or_else(|_| {
                                                let home = env::var("HOME").unwrap_or_else(|_| ".".into());
                                                PathBuf::from(home).join("ciclo-run")
                                            });
        Self::new(base.join(workflow_id))
    }

    /// Base primaria, privada del scheduler (modo 0600).
    pub fn primary_db(&self) -> PathBuf {
        self.run_dir.join(".service").join(DB_FILE_BASE_NAME)
    }

    /// Réplica pública para lectores externos (modo 0644).
    pub fn public_db(&self) -> PathBuf {
        self.run_dir.join("log").join(DB_FILE_BASE_NAME)
    }

    pub fn scheduler_log_dir(&self) -> PathBuf {
        self.run_dir.join("log").join("scheduler")
    }

    pub fn job_log_dir(&self, cycle: &str, name: &str, submit_num: i64) -> PathBuf {
        self.run_dir
            .join("log")
            .join("job")
            .join(cycle)
            .join(name)
            .join(format!("{submit_num:02}"))
    }

    pub fn share_dir(&self) -> PathBuf {
        self.run_dir.join("share")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.run_dir.join("work")
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
