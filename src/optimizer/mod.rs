//! # Optimizer Module
//!
//! Modulo che separa le responsabilità della pipeline di compressione in sottomoduli:
//! - `orchestrator`: Orchestratore principale, proprietario dei candidati
//! - `worker_pool`: Coda di job e pool di worker paralleli
//! - `task_optimizer`: Worker per singoli candidati (compressione + replace atomico)
//! - `progress_tracker`: Collector dei risultati ed eventi di progresso
//! - `path_resolver`: Logica di calcolo path centralizzata

pub mod orchestrator;
pub mod path_resolver;
pub mod progress_tracker;
pub mod task_optimizer;
pub mod worker_pool;

#[cfg(test)]
mod scenario_tests;

pub use orchestrator::{CandidateStream, CompressionHandle, Orchestrator};
pub use path_resolver::PathResolver;
pub use progress_tracker::{ProgressEvent, RunSummary};
pub use task_optimizer::TaskOptimizer;
pub use worker_pool::{CancellationFlag, WorkerPool};
