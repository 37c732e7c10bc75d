//! # History Module
//!
//! Questo modulo tiene lo storico dei risparmi ottenuti per ogni directory root.
//!
//! ## Responsabilità:
//! - Persiste un record per ogni esecuzione in un file JSON per root
//! - Fornisce totali storici (byte risparmiati, riduzione media)
//! - Non viene mai letto dalla pipeline: il filesystem resta l'unica fonte
//!   di verità sullo stato dei candidati
//!
//! ## Strategia di persistence:
//! - Un file JSON per directory root (basato su hash del path)
//! - Salvataggio in `~/.space-artifact-optimizer/history_<hash>.json`
//!
//! ## Esempio history file:
//! ```json
//! {
//!   "runs": [
//!     {
//!       "timestamp": 1700000000,
//!       "root": "/home/me/code",
//!       "bytes_before": 1048576,
//!       "bytes_after": 4096,
//!       "saved": 1044480,
//!       "compressed": 3,
//!       "failed": 0,
//!       "score": 12.4
//!     }
//!   ]
//! }
//! ```

use crate::stats::AggregateStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

const HISTORY_DIR: &str = ".space-artifact-optimizer";

/// Record of a single run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunRecord {
    pub timestamp: u64,
    pub root: PathBuf,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub saved: u64,
    pub compressed: usize,
    pub failed: usize,
    pub score: f64,
}

impl RunRecord {
    pub fn new(root: &Path, stats: &AggregateStats) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            root: root.to_path_buf(),
            bytes_before: stats.bytes_before,
            bytes_after: stats.bytes_after,
            saved: stats.saved_bytes(),
            compressed: stats.compressed,
            failed: stats.failed,
            score: stats.efficiency_score(),
        }
    }

    pub fn reduction_percent(&self) -> f64 {
        crate::fs_ops::calculate_reduction(self.bytes_before, self.bytes_after)
    }
}

/// On-disk layout of a history file
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct HistoryFile {
    pub runs: Vec<RunRecord>,
}

/// Totals across every recorded run of a root
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryTotals {
    pub runs: usize,
    pub total_compressed: usize,
    pub total_bytes_saved: u64,
    pub average_reduction: f64,
}

/// Reads and appends the history of one root directory
pub struct HistoryLog {
    path: PathBuf,
    history: HistoryFile,
}

impl HistoryLog {
    /// Open the history of `root` in the user's home directory
    pub async fn open(root: &Path) -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
            .join(HISTORY_DIR);
        Self::open_in(&dir, root).await
    }

    /// Open the history of `root` stored below `dir`
    pub async fn open_in(dir: &Path, root: &Path) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("history_{}.json", Self::root_key(root)));

        let history = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str(&content) {
                Ok(history) => history,
                Err(e) => {
                    warn!("Ignoring unreadable history {}: {}", path.display(), e);
                    HistoryFile::default()
                }
            }
        } else {
            HistoryFile::default()
        };

        Ok(Self { path, history })
    }

    /// Unique key for a root directory
    fn root_key(root: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        hex::encode(hasher.finalize())[..16].to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.history.runs
    }

    /// Append a run and save
    pub async fn append(&mut self, record: RunRecord) -> Result<()> {
        self.history.runs.push(record);
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.history)?;
        fs::write(&self.path, content).await?;
        debug!("History saved to {}", self.path.display());
        Ok(())
    }

    pub fn totals(&self) -> HistoryTotals {
        let runs = &self.history.runs;
        let average_reduction = if runs.is_empty() {
            0.0
        } else {
            runs.iter().map(|r| r.reduction_percent()).sum::<f64>() / runs.len() as f64
        };
        HistoryTotals {
            runs: runs.len(),
            total_compressed: runs.iter().map(|r| r.compressed).sum(),
            total_bytes_saved: runs.iter().map(|r| r.saved).sum(),
            average_reduction,
        }
    }
}
