//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di compressione e classificazione
//! - Fornisce validazione robusta dei parametri di input (`ConfigError` all'avvio)
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `compression_level`: Livello zstd (1-22, default: 15)
//! - `min_file_size_bytes`: Dimensione minima per file generici (default: 1 MiB)
//! - `stale_age_days`: Età minima dei log (default: 30 giorni)
//! - `worker_count`: Numero di worker paralleli (default: core logici)
//! - `verify`: Decodifica e confronta prima del rename (default: true)
//! - `skip_hidden`: Salta directory nascoste (default: true)
//! - `purge_stale_temps`: Rimuove file temporanei orfani durante lo scan (default: true)
//! - `job_timeout_secs`: Limite opzionale per singolo job (default: nessuno)
//! - `dependency_dirs` / `build_dirs` / `log_extensions`: pattern del classifier
//!
//! Il margine di sicurezza è fisso: si sostituisce solo se
//! `compressed_size < original_size` (disuguaglianza stretta).
//!
//! ## Esempio:
//! ```rust
//! use space_artifact_optimizer::Config;
//!
//! let config = Config {
//!     compression_level: 19,
//!     worker_count: 8,
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use crate::error::OptimizeError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 15;
pub const DEFAULT_MIN_FILE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_STALE_AGE_DAYS: u64 = 30;

const MAX_COMPRESSION_LEVEL: i32 = 22;
const MAX_STALE_AGE_DAYS: u64 = 36_500;

/// Configuration for artifact optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// zstd compression level (1-22)
    pub compression_level: i32,
    /// Generic files smaller than this are not eligible
    pub min_file_size_bytes: u64,
    /// Log files must be at least this old
    pub stale_age_days: u64,
    /// Number of parallel workers
    pub worker_count: usize,
    /// Decode the staged output and compare digests before replacing
    pub verify: bool,
    /// Prune hidden directories that are not known artifact directories
    pub skip_hidden: bool,
    /// Delete temp files left behind by an interrupted run
    pub purge_stale_temps: bool,
    /// Optional upper bound on a single job
    pub job_timeout_secs: Option<u64>,
    /// Directory names treated as dependency trees
    pub dependency_dirs: Vec<String>,
    /// Directory names treated as build output
    pub build_dirs: Vec<String>,
    /// Extensions (without dot) treated as logs
    pub log_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            min_file_size_bytes: DEFAULT_MIN_FILE_SIZE,
            stale_age_days: DEFAULT_STALE_AGE_DAYS,
            worker_count: default_worker_count(),
            verify: true,
            skip_hidden: true,
            purge_stale_temps: true,
            job_timeout_secs: None,
            dependency_dirs: to_strings(&["node_modules", "bower_components", "venv", ".venv", ".tox", "Pods"]),
            build_dirs: to_strings(&["target", "build", "dist", "__pycache__", ".next", ".gradle"]),
            log_extensions: to_strings(&["log", "txt", "old", "out"]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Logical core count, falling back to 4 when it cannot be queried.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), OptimizeError> {
        if !(1..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            return Err(OptimizeError::Config(format!(
                "compression level must be between 1 and {}, got {}",
                MAX_COMPRESSION_LEVEL, self.compression_level
            )));
        }

        if self.min_file_size_bytes == 0 {
            return Err(OptimizeError::Config("minimum file size must be greater than 0".into()));
        }

        if self.stale_age_days > MAX_STALE_AGE_DAYS {
            return Err(OptimizeError::Config(format!(
                "stale age must be at most {} days",
                MAX_STALE_AGE_DAYS
            )));
        }

        if self.worker_count == 0 {
            return Err(OptimizeError::Config("number of workers must be greater than 0".into()));
        }

        if self.job_timeout_secs == Some(0) {
            return Err(OptimizeError::Config("job timeout must be greater than 0 seconds".into()));
        }

        for name in self.dependency_dirs.iter().chain(&self.build_dirs) {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(OptimizeError::Config(format!("invalid artifact directory name: {:?}", name)));
            }
        }

        for ext in &self.log_extensions {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(OptimizeError::Config(format!("invalid log extension: {:?}", ext)));
            }
        }

        Ok(())
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn stale_age(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_age_days * 24 * 60 * 60)
    }
}
