//! # Progress Tracking Module
//!
//! Collector unico dei messaggi dei worker.
//!
//! ## Responsabilità:
//! - Unico punto che applica le transizioni terminali sulla `CandidateTable`
//!   (Compressed / Skipped(NoGain) / Failed) e registra i risultati nello
//!   `StatsAggregator`: nessun worker tocca stato o statistiche direttamente
//! - Inoltra al chiamante un `ProgressEvent` per ogni cambio di stato e per
//!   ogni avanzamento riportato dai worker
//! - Costruisce il `RunSummary` dell'esecuzione

use crate::candidate::{CandidateId, CandidateState, CandidateTable, SkipReason};
use crate::fs_ops;
use crate::optimizer::task_optimizer::{JobOutcome, JobReport};
use crate::stats::{Outcome, StatsAggregator};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Update pushed to whoever observes a compression run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub candidate_id: CandidateId,
    pub path: PathBuf,
    pub state: CandidateState,
    /// Uncompressed bytes consumed so far (equals `original_size` once terminal)
    pub bytes_processed: u64,
    pub original_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Messages sent from worker tasks to the collector
#[derive(Debug)]
pub enum WorkerMessage {
    Started { id: CandidateId, path: PathBuf, original_size: u64 },
    Progress { id: CandidateId, path: PathBuf, bytes: u64 },
    Finished(JobReport),
}

/// Totals of a single compression run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Jobs handed to a worker
    pub dispatched: usize,
    pub compressed: usize,
    /// Jobs that ended as `Skipped(NoGain)`
    pub skipped: usize,
    pub failed: usize,
    /// Queued jobs never dispatched because the run was cancelled; still Pending
    pub not_dispatched: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn saved_bytes(&self) -> u64 {
        self.bytes_before - self.bytes_after
    }

    pub fn format_summary(&self) -> String {
        let mut summary = format!(
            "Run: {} dispatched | {} compressed | {} skipped | {} failed | saved {} in {:.1}s",
            self.dispatched,
            self.compressed,
            self.skipped,
            self.failed,
            fs_ops::format_size(self.saved_bytes()),
            self.elapsed.as_secs_f64()
        );
        if self.cancelled {
            summary.push_str(&format!(" | cancelled, {} left pending", self.not_dispatched));
        }
        summary
    }
}

/// Consumes worker messages; single writer for terminal state and stats
pub struct ProgressTracker {
    candidates: Arc<CandidateTable>,
    stats: Arc<StatsAggregator>,
    events: mpsc::UnboundedSender<ProgressEvent>,
    summary: RunSummary,
}

impl ProgressTracker {
    pub fn new(
        candidates: Arc<CandidateTable>,
        stats: Arc<StatsAggregator>,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self { candidates, stats, events, summary: RunSummary::default() }
    }

    /// Drain `messages` until every worker has hung up.
    pub async fn run(mut self, mut messages: mpsc::UnboundedReceiver<WorkerMessage>) -> RunSummary {
        while let Some(message) = messages.recv().await {
            self.handle(message);
        }
        self.summary
    }

    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        if self.events.send(event).is_err() {
            debug!("Progress event dropped: no subscriber");
        }
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Started { id, path, original_size } => self.emit(ProgressEvent {
                candidate_id: id,
                path,
                state: CandidateState::Compressing,
                bytes_processed: 0,
                original_size,
                compressed_size: None,
                error: None,
            }),
            WorkerMessage::Progress { id, path, bytes } => {
                let original_size = self.candidates.get(id).map(|c| c.size_bytes).unwrap_or(bytes);
                self.emit(ProgressEvent {
                    candidate_id: id,
                    path,
                    state: CandidateState::Compressing,
                    bytes_processed: bytes,
                    original_size,
                    compressed_size: None,
                    error: None,
                });
            }
            WorkerMessage::Finished(report) => self.finish(report),
        }
    }

    fn finish(&mut self, report: JobReport) {
        let JobReport { id, path, outcome, result } = report;

        let (state, stats_outcome, compressed_size, error) = match outcome {
            JobOutcome::Compressed { output_path } => {
                self.summary.compressed += 1;
                (
                    CandidateState::Compressed { output_path },
                    Outcome::Compressed,
                    Some(result.compressed_size),
                    None,
                )
            }
            JobOutcome::NoGain => {
                self.summary.skipped += 1;
                (
                    CandidateState::Skipped(SkipReason::NoGain),
                    Outcome::Skipped,
                    Some(result.compressed_size),
                    None,
                )
            }
            JobOutcome::Failed(reason) => {
                self.summary.failed += 1;
                let message = format!("{}: {}", reason.kind, reason.message);
                let kind = reason.kind;
                (CandidateState::Failed(reason), Outcome::Failed(kind), None, Some(message))
            }
        };

        if let Err(e) = self.candidates.transition(id, state.clone()) {
            error!("Could not record final state of {}: {}", path.display(), e);
        }
        self.stats.record(&result, stats_outcome);
        self.summary.bytes_before += result.original_size;
        self.summary.bytes_after += result.resulting_size();

        self.emit(ProgressEvent {
            candidate_id: id,
            path,
            state,
            bytes_processed: result.original_size,
            original_size: result.original_size,
            compressed_size,
            error,
        });
    }
}
