//! # Worker Pool Module
//!
//! Pool di worker async che consumano una coda di job condivisa.
//!
//! ## Responsabilità:
//! - Coda `mpsc` riempita in anticipo e condivisa tra `min(worker_count, job)` task
//! - Ogni worker reclama il candidato (Pending → Compressing) prima di lavorarlo:
//!   un candidato non viene mai elaborato da due worker
//! - La compressione gira in `spawn_blocking`, il runtime async resta libero
//! - I risultati passano dal canale dei messaggi al `ProgressTracker`
//! - Cancellazione cooperativa: il flag viene controllato solo prima di
//!   prelevare il prossimo job, i job già partiti arrivano fino alla fine
//!
//! ## Esempio:
//! ```rust,ignore
//! let pool = WorkerPool::new(&config);
//! let summary = pool.run(jobs, candidates, stats, cancel, events, ()).await?;
//! ```

use crate::candidate::{CandidateTable, CompressionResult, FailureKind, FailureReason};
use crate::config::Config;
use crate::optimizer::progress_tracker::{ProgressEvent, ProgressTracker, RunSummary, WorkerMessage};
use crate::optimizer::task_optimizer::{Job, JobOutcome, JobReport, TaskOptimizer};
use crate::stats::StatsAggregator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Shared cancellation switch of one run
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both handles switch the same run.
    pub fn is_same(&self, other: &CancellationFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Fixed-size pool of compression workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    optimizer: TaskOptimizer,
}

impl WorkerPool {
    pub fn new(config: &Config) -> Self {
        Self {
            workers: config.worker_count.max(1),
            optimizer: TaskOptimizer::new(config),
        }
    }

    /// Start processing `jobs`. Must be called from within a Tokio runtime.
    ///
    /// `guard` is held until the run is over, collector included.
    /// The returned handle resolves to the run summary.
    pub fn run<G: Send + 'static>(
        &self,
        jobs: Vec<Job>,
        candidates: Arc<CandidateTable>,
        stats: Arc<StatsAggregator>,
        cancel: CancellationFlag,
        events: mpsc::UnboundedSender<ProgressEvent>,
        guard: G,
    ) -> JoinHandle<RunSummary> {
        let started = Instant::now();
        let total = jobs.len();

        let (job_tx, job_rx) = mpsc::channel(total.max(1));
        for job in jobs {
            // Capacity equals the job count, so the queue cannot be full.
            if let Err(e) = job_tx.try_send(job) {
                error!("Could not enqueue job: {}", e);
            }
        }
        drop(job_tx);
        let queue: JobQueue = Arc::new(Mutex::new(job_rx));

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(ProgressTracker::new(candidates.clone(), stats, events).run(message_rx));

        let worker_count = self.workers.min(total);
        info!("Starting {} workers for {} jobs", worker_count, total);
        let workers: Vec<_> = (0..worker_count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    queue.clone(),
                    candidates.clone(),
                    self.optimizer.clone(),
                    cancel.clone(),
                    message_tx.clone(),
                ))
            })
            .collect();
        drop(message_tx);

        tokio::spawn(async move {
            let _guard = guard;

            let mut dispatched = 0;
            for worker in workers {
                match worker.await {
                    Ok(n) => dispatched += n,
                    Err(e) => error!("Worker task failed: {}", e),
                }
            }

            let mut not_dispatched = 0;
            {
                let mut rx = queue.lock().await;
                while rx.try_recv().is_ok() {
                    not_dispatched += 1;
                }
            }

            let mut summary = match collector.await {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Progress collector failed: {}", e);
                    RunSummary::default()
                }
            };
            summary.dispatched = dispatched;
            summary.not_dispatched = not_dispatched;
            summary.cancelled = cancel.is_cancelled();
            summary.elapsed = started.elapsed();

            if summary.cancelled {
                info!("Run cancelled: {} jobs left pending", not_dispatched);
            }
            summary
        })
    }
}

/// Pull jobs until the queue is empty or the run is cancelled.
/// Returns how many jobs this worker dispatched.
async fn worker_loop(
    worker: usize,
    queue: JobQueue,
    candidates: Arc<CandidateTable>,
    optimizer: TaskOptimizer,
    cancel: CancellationFlag,
    messages: mpsc::UnboundedSender<WorkerMessage>,
) -> usize {
    let mut dispatched = 0;

    loop {
        // Checked under the queue lock so a job is either dispatched or left queued.
        let job = {
            let mut rx = queue.lock().await;
            if cancel.is_cancelled() {
                None
            } else {
                rx.recv().await
            }
        };
        let Some(job) = job else { break };

        let candidate = match candidates.claim(job.id) {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!("Worker {} not dispatching {}: {}", worker, job.id, e);
                continue;
            }
        };
        dispatched += 1;

        let _ = messages.send(WorkerMessage::Started {
            id: job.id,
            path: job.path.clone(),
            original_size: candidate.size_bytes,
        });

        let id = job.id;
        let path = job.path.clone();
        let progress_tx = messages.clone();
        let task_optimizer = optimizer.clone();
        let report = tokio::task::spawn_blocking(move || {
            let progress_path = job.path.clone();
            let mut progress = |bytes: u64| {
                let _ = progress_tx.send(WorkerMessage::Progress { id: job.id, path: progress_path.clone(), bytes });
            };
            task_optimizer.process(&job, &mut progress)
        })
        .await;

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                error!("Worker {} lost job {}: {}", worker, path.display(), e);
                JobReport {
                    id,
                    path,
                    outcome: JobOutcome::Failed(FailureReason {
                        kind: FailureKind::Compression,
                        message: format!("compression task aborted: {}", e),
                    }),
                    result: CompressionResult::unchanged(id, candidate.size_bytes, None, Duration::ZERO),
                }
            }
        };

        if messages.send(WorkerMessage::Finished(report)).is_err() {
            error!("Worker {}: progress collector is gone", worker);
            break;
        }
    }

    debug!("Worker {} finished after {} jobs", worker, dispatched);
    dispatched
}
