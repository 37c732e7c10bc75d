//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per comunicazione con altri processi.
//!
//! ## Responsabilità:
//! - Emette un messaggio JSON per riga su stdout
//! - Riusa le strutture della libreria (`CandidateFile`, `ProgressEvent`, `AggregateStats`)
//! - Fornisce interfaccia standardizzata per comunicazione inter-processo
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio esecuzione (root e configurazione)
//! - `candidate`: Un candidato trovato dalla scansione
//! - `event`: Cambio di stato o avanzamento di un candidato
//! - `complete`: Fine esecuzione con statistiche finali e storiche
//! - `error`: Errore fatale

use crate::candidate::{CandidateFile, CandidateId, CandidateState, Category, EntryKind};
use crate::config::Config;
use crate::history::HistoryTotals;
use crate::optimizer::{ProgressEvent, RunSummary};
use crate::stats::AggregateStats;
use serde::Serialize;
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Inizio dell'esecuzione
    Start {
        root: PathBuf,
        scan_only: bool,
        config: JsonConfig,
    },

    /// Candidato trovato dalla scansione
    Candidate {
        id: CandidateId,
        path: PathBuf,
        kind: EntryKind,
        category: Category,
        size_bytes: u64,
        #[serde(flatten)]
        state: CandidateState,
    },

    /// Evento di progresso di un candidato
    Event(ProgressEvent),

    /// Esecuzione completata
    Complete {
        run: RunSummary,
        stats: AggregateStats,
        efficiency_score: f64,
        history: Option<HistoryTotals>,
    },

    /// Errore generale
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione riportata nel messaggio `start`
#[derive(Debug, Serialize)]
pub struct JsonConfig {
    pub compression_level: i32,
    pub min_file_size_bytes: u64,
    pub stale_age_days: u64,
    pub worker_count: usize,
    pub verify: bool,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(root: PathBuf, scan_only: bool, config: &Config) -> Self {
        Self::Start { root, scan_only, config: JsonConfig::from(config) }
    }

    pub fn candidate(candidate: &CandidateFile) -> Self {
        Self::Candidate {
            id: candidate.id,
            path: candidate.path.clone(),
            kind: candidate.kind,
            category: candidate.category,
            size_bytes: candidate.size_bytes,
            state: candidate.state.clone(),
        }
    }

    pub fn event(event: ProgressEvent) -> Self {
        Self::Event(event)
    }

    pub fn complete(run: RunSummary, stats: AggregateStats, history: Option<HistoryTotals>) -> Self {
        let efficiency_score = stats.efficiency_score();
        Self::Complete { run, stats, efficiency_score, history }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            compression_level: config.compression_level,
            min_file_size_bytes: config.min_file_size_bytes,
            stale_age_days: config.stale_age_days,
            worker_count: config.worker_count,
            verify: config.verify,
        }
    }
}
