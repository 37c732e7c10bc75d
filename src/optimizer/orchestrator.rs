//! # Orchestrator Module
//!
//! Orchestratore principale: possiede la collezione dei candidati e il loro
//! ciclo di vita, e delega il lavoro ai moduli specializzati.
//!
//! ## Operazioni pubbliche:
//! - `scan(root)`: sequenza lazy di `CandidateFile`, ogni chiamata riparte da zero
//! - `start_compression(ids)`: accoda solo i candidati Pending, restituisce un
//!   `CompressionHandle` (stream di `ProgressEvent` + riepilogo finale)
//! - `cancel()`: cooperativo, vale per tutte le esecuzioni attive; nessun nuovo job dopo la richiesta
//! - `delete(id, confirm)`: rimozione manuale e irreversibile, mai invocata dai worker
//! - `reset(id)`: riporta a Pending un candidato NoGain / Failed
//! - `stats()`: snapshot di `AggregateStats`

use crate::candidate::{CandidateFile, CandidateId, CandidateState, CandidateTable, Category};
use crate::classifier::{Classifier, EntryMetadata};
use crate::config::Config;
use crate::error::OptimizeError;
use crate::fs_ops;
use crate::optimizer::progress_tracker::{ProgressEvent, RunSummary};
use crate::optimizer::task_optimizer::Job;
use crate::optimizer::worker_pool::{CancellationFlag, WorkerPool};
use crate::scanner::{ScanIter, Scanner};
use crate::stats::{AggregateStats, StatsAggregator};
use futures::Stream;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lazy sequence of classified candidates produced by `Orchestrator::scan`
pub struct CandidateStream {
    entries: ScanIter,
    classifier: Classifier,
    candidates: Arc<CandidateTable>,
    now: SystemTime,
}

impl Iterator for CandidateStream {
    type Item = CandidateFile;

    fn next(&mut self) -> Option<CandidateFile> {
        let entry = self.entries.next()?;
        let classification = self.classifier.classify(
            &EntryMetadata {
                path: &entry.path,
                kind: entry.kind,
                size_bytes: entry.size_bytes,
                modified_time: entry.modified_time,
            },
            self.now,
        );
        let candidate = self.candidates.insert(CandidateFile {
            id: CandidateId(0),
            path: entry.path,
            kind: entry.kind,
            size_bytes: entry.size_bytes,
            modified_time: entry.modified_time,
            category: classification.category,
            state: classification.state,
        });
        debug!("{} {} [{}] {}", candidate.id, candidate.path.display(), candidate.category.label(), candidate.state);
        Some(candidate)
    }
}

/// Cancellation flags of the runs still in progress
type ActiveRuns = Arc<Mutex<Vec<CancellationFlag>>>;

fn lock_runs(runs: &ActiveRuns) -> MutexGuard<'_, Vec<CancellationFlag>> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registers a run as active until dropped
struct RunGuard {
    runs: ActiveRuns,
    flag: CancellationFlag,
}

impl RunGuard {
    fn new(runs: &ActiveRuns, flag: CancellationFlag) -> Self {
        lock_runs(runs).push(flag.clone());
        Self { runs: runs.clone(), flag }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock_runs(&self.runs).retain(|f| !f.is_same(&self.flag));
    }
}

/// Handle to a running compression: a stream of progress events that
/// ends once every dispatched job has reached a terminal state.
pub struct CompressionHandle {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    summary: JoinHandle<RunSummary>,
    cancel: CancellationFlag,
    queued: usize,
}

impl CompressionHandle {
    /// Jobs enqueued by this run
    pub fn queued(&self) -> usize {
        self.queued
    }

    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish, discarding any unread events.
    pub async fn wait(self) -> RunSummary {
        drop(self.events);
        match self.summary.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Compression run failed: {}", e);
                RunSummary::default()
            }
        }
    }
}

impl Stream for CompressionHandle {
    type Item = ProgressEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ProgressEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Orchestratore principale
pub struct Orchestrator {
    config: Config,
    scanner: Scanner,
    classifier: Classifier,
    pool: WorkerPool,
    candidates: Arc<CandidateTable>,
    stats: Arc<StatsAggregator>,
    active_runs: ActiveRuns,
}

impl Orchestrator {
    /// Crea nuova istanza; la configurazione viene validata qui
    pub fn new(config: Config) -> Result<Self, OptimizeError> {
        config.validate()?;
        Ok(Self {
            scanner: Scanner::new(&config),
            classifier: Classifier::new(&config),
            pool: WorkerPool::new(&config),
            candidates: Arc::new(CandidateTable::new()),
            stats: Arc::new(StatsAggregator::new()),
            active_runs: Arc::new(Mutex::new(Vec::new())),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn is_running(&self) -> bool {
        !lock_runs(&self.active_runs).is_empty()
    }

    /// Fresh traversal of `root`. Replaces the candidates of any previous scan;
    /// refused while a compression run is active.
    pub fn scan(&self, root: &Path) -> Result<CandidateStream, OptimizeError> {
        if self.is_running() {
            return Err(OptimizeError::Busy("a compression run is in progress".into()));
        }
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("scan root is not a directory: {}", root.display()),
            )
            .into());
        }

        info!("Scanning {}", root.display());
        self.candidates.clear();
        Ok(CandidateStream {
            entries: self.scanner.scan(root),
            classifier: self.classifier.clone(),
            candidates: self.candidates.clone(),
            now: SystemTime::now(),
        })
    }

    /// Snapshot of all candidates of the current scan, in discovery order
    pub fn candidates(&self) -> Vec<CandidateFile> {
        self.candidates.snapshot()
    }

    pub fn candidate(&self, id: CandidateId) -> Option<CandidateFile> {
        self.candidates.get(id)
    }

    /// Ids of every candidate currently Pending
    pub fn pending_ids(&self) -> Vec<CandidateId> {
        self.candidates.snapshot().into_iter().filter(|c| c.is_pending()).map(|c| c.id).collect()
    }

    /// Enqueue the selected candidates that are still Pending; anything else
    /// in the selection is ignored. Must be called from within a Tokio runtime.
    pub fn start_compression(&self, selection: impl IntoIterator<Item = CandidateId>) -> CompressionHandle {
        let selected: BTreeSet<CandidateId> = selection.into_iter().collect();
        let jobs: Vec<Job> = selected
            .iter()
            .filter_map(|id| match self.candidates.get(*id) {
                Some(c) if c.is_pending() => Some(Job { id: c.id, path: c.path, kind: c.kind }),
                Some(c) => {
                    debug!("Not enqueuing {} in state {}", c.id, c.state);
                    None
                }
                None => {
                    debug!("Not enqueuing unknown candidate {}", id);
                    None
                }
            })
            .collect();

        info!("Enqueued {} of {} selected candidates", jobs.len(), selected.len());

        let cancel = CancellationFlag::new();
        let guard = RunGuard::new(&self.active_runs, cancel.clone());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let queued = jobs.len();
        let summary = self.pool.run(
            jobs,
            self.candidates.clone(),
            self.stats.clone(),
            cancel.clone(),
            event_tx,
            guard,
        );

        CompressionHandle { events: event_rx, summary, cancel, queued }
    }

    /// Stop dispatching new jobs in every active run. In-flight jobs finish.
    pub fn cancel(&self) {
        let runs = lock_runs(&self.active_runs);
        info!("Cancellation requested for {} active runs", runs.len());
        for flag in runs.iter() {
            flag.cancel();
        }
    }

    /// Remove a candidate from disk for good. For a compressed candidate the
    /// replacement is removed. Returns the bytes freed.
    pub fn delete(&self, id: CandidateId, confirm: bool) -> Result<u64, OptimizeError> {
        if !confirm {
            return Err(OptimizeError::NotConfirmed(id));
        }
        let lease = self.candidates.lease(id)?;
        let target = match &lease.candidate.state {
            CandidateState::Compressed { output_path } => output_path.clone(),
            _ => lease.candidate.path.clone(),
        };

        let freed = fs_ops::remove_entry(&target)?;
        self.candidates.transition(id, CandidateState::Removed)?;
        self.stats.record_removal(freed);
        drop(lease);

        info!("Removed {} ({})", target.display(), fs_ops::format_size(freed));
        Ok(freed)
    }

    /// Move a NoGain or Failed candidate back to Pending so it can be retried.
    pub fn reset(&self, id: CandidateId) -> Result<CandidateFile, OptimizeError> {
        let candidate = self.candidates.reset(id)?;
        debug!("Reset {} to pending", candidate.path.display());
        Ok(candidate)
    }

    pub fn stats(&self) -> AggregateStats {
        self.stats.snapshot()
    }

    /// Eligible bytes per category in the current scan
    pub fn pending_by_category(&self) -> Vec<(Category, usize, u64)> {
        let mut totals: Vec<(Category, usize, u64)> = Vec::new();
        for c in self.candidates.snapshot().into_iter().filter(|c| c.is_pending()) {
            match totals.iter_mut().find(|(category, _, _)| *category == c.category) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 += c.size_bytes;
                }
                None => totals.push((c.category, 1, c.size_bytes)),
            }
        }
        totals
    }
}
