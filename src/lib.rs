//! # Space Artifact Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per diverse operazioni
//! - `candidate`: Modello dati dei candidati e collezione sincronizzata
//! - `scanner`: Discovery ricorsiva con protezione dai cicli
//! - `classifier`: Regole di eleggibilità (dipendenze, build, log, generici)
//! - `optimizer`: Orchestratore, pool di worker e replace atomico
//! - `stats`: Statistiche aggregate ed efficiency score
//! - `fs_ops`: Operazioni sui file (dimensioni, rimozione, formattazione)
//! - `history`: Storico dei risparmi per directory root
//! - `json_output` / `progress`: Output per il binario
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use space_artifact_optimizer::{Config, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(Config::default())?;
//! orchestrator.scan(&path)?.for_each(drop);
//! let summary = orchestrator.start_compression(orchestrator.pending_ids()).wait().await;
//! ```

pub mod candidate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod history;
pub mod json_output;
pub mod optimizer;
pub mod progress;
pub mod scanner;
pub mod stats;

pub use candidate::{
    CandidateFile, CandidateId, CandidateState, Category, CompressionResult, EntryKind, FailureKind,
    FailureReason, SkipReason,
};
pub use config::Config;
pub use error::OptimizeError;
pub use history::{HistoryLog, HistoryTotals, RunRecord};
pub use json_output::JsonMessage;
pub use optimizer::{CompressionHandle, Orchestrator, ProgressEvent, RunSummary};
pub use progress::ProgressManager;
pub use stats::{AggregateStats, StatsAggregator};
