//! # Statistics Module
//!
//! Questo modulo accumula i risultati dei job in un riepilogo di efficienza.
//!
//! ## Responsabilità:
//! - `AggregateStats`: totali byte prima/dopo, contatori per stato terminale,
//!   contatori per tipo di errore, byte liberati da Delete
//! - `StatsAggregator`: unico proprietario di `AggregateStats`, aggiornato solo
//!   tramite `record` / `record_removal` sotto lock (niente lost update,
//!   niente doppio conteggio: ogni candidato contribuisce solo con l'ultimo esito)
//! - Efficiency score deterministico
//!
//! ## Efficiency score:
//! ```text
//! score = (ratio / REFERENCE_RATIO)^ALPHA · (REFERENCE_SECS_PER_GIB / secs_per_gib)^(1 - ALPHA)
//! ```
//! dove `ratio = bytes_before / bytes_after` e `secs_per_gib` è il tempo di
//! elaborazione sommato dei job diviso per i GiB originali.
//! È una metrica cosmetica: cresce monotonicamente con il ratio.

use crate::candidate::{CandidateId, CompressionResult, FailureKind};
use crate::fs_ops;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub const REFERENCE_RATIO: f64 = 3.0;
pub const REFERENCE_SECS_PER_GIB: f64 = 10.0;
pub const ALPHA: f64 = 0.7;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
/// Floor for the time term so an instant run does not divide by zero.
const MIN_SECS_PER_GIB: f64 = 1e-3;

/// Terminal outcome of a job as seen by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Compressed,
    Skipped,
    Failed(FailureKind),
}

/// Running totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Sum of original sizes over all recorded jobs
    pub bytes_before: u64,
    /// Sum of resulting on-disk sizes over all recorded jobs
    pub bytes_after: u64,
    pub compressed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub removed: usize,
    pub bytes_removed: u64,
    pub processing_time: Duration,
}

impl AggregateStats {
    pub fn saved_bytes(&self) -> u64 {
        self.bytes_before - self.bytes_after
    }

    pub fn jobs(&self) -> usize {
        self.compressed + self.skipped + self.failed
    }

    /// Aggregate ratio of bytes before to bytes after.
    pub fn ratio(&self) -> f64 {
        if self.bytes_after == 0 {
            1.0
        } else {
            self.bytes_before as f64 / self.bytes_after as f64
        }
    }

    pub fn reduction_percent(&self) -> f64 {
        fs_ops::calculate_reduction(self.bytes_before, self.bytes_after)
    }

    pub fn efficiency_score(&self) -> f64 {
        if self.jobs() == 0 || self.bytes_before == 0 {
            return 0.0;
        }
        let gib = self.bytes_before as f64 / GIB;
        let secs_per_gib = (self.processing_time.as_secs_f64() / gib).max(MIN_SECS_PER_GIB);
        efficiency_score(self.ratio(), secs_per_gib)
    }

    pub fn format_summary(&self) -> String {
        let mut summary = format!(
            "Jobs: {} | Compressed: {} | Skipped: {} | Failed: {} | Saved: {} ({:.2}%) | Score: {:.2}",
            self.jobs(),
            self.compressed,
            self.skipped,
            self.failed,
            fs_ops::format_size(self.saved_bytes()),
            self.reduction_percent(),
            self.efficiency_score(),
        );
        if self.removed > 0 {
            summary.push_str(&format!(
                " | Removed: {} ({})",
                self.removed,
                fs_ops::format_size(self.bytes_removed)
            ));
        }
        summary
    }
}

/// Pure score formula; monotonically increasing in `ratio`.
pub fn efficiency_score(ratio: f64, secs_per_gib: f64) -> f64 {
    (ratio / REFERENCE_RATIO).powf(ALPHA) * (REFERENCE_SECS_PER_GIB / secs_per_gib).powf(1.0 - ALPHA)
}

#[derive(Default)]
struct Inner {
    stats: AggregateStats,
    latest: HashMap<CandidateId, (CompressionResult, Outcome)>,
}

impl Inner {
    fn apply(&mut self, result: &CompressionResult, outcome: Outcome) {
        let stats = &mut self.stats;
        stats.bytes_before += result.original_size;
        stats.bytes_after += result.resulting_size();
        stats.processing_time += result.elapsed;
        match outcome {
            Outcome::Compressed => stats.compressed += 1,
            Outcome::Skipped => stats.skipped += 1,
            Outcome::Failed(kind) => {
                stats.failed += 1;
                *stats.failures_by_kind.entry(kind).or_insert(0) += 1;
            }
        }
    }

    fn retract(&mut self, result: &CompressionResult, outcome: Outcome) {
        let stats = &mut self.stats;
        stats.bytes_before -= result.original_size;
        stats.bytes_after -= result.resulting_size();
        stats.processing_time = stats.processing_time.saturating_sub(result.elapsed);
        match outcome {
            Outcome::Compressed => stats.compressed -= 1,
            Outcome::Skipped => stats.skipped -= 1,
            Outcome::Failed(kind) => {
                stats.failed -= 1;
                if let Some(count) = stats.failures_by_kind.get_mut(&kind) {
                    *count -= 1;
                    if *count == 0 {
                        stats.failures_by_kind.remove(&kind);
                    }
                }
            }
        }
    }
}

/// Thread-safe owner of the aggregate
#[derive(Default)]
pub struct StatsAggregator {
    inner: Mutex<Inner>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal result. Each candidate contributes its latest
    /// result only: a second result for the same id (after a reset)
    /// replaces the first. Returns false when a previous result was replaced.
    pub fn record(&self, result: &CompressionResult, outcome: Outcome) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = inner.latest.insert(result.candidate_id, (result.clone(), outcome));
        if let Some((old, old_outcome)) = &previous {
            inner.retract(old, *old_outcome);
        }
        inner.apply(result, outcome);
        previous.is_none()
    }

    pub fn record_removal(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.stats.removed += 1;
        inner.stats.bytes_removed += bytes;
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn result(id: u64, original: u64, compressed: u64) -> CompressionResult {
        CompressionResult::committed(CandidateId(id), original, compressed, Duration::from_millis(10))
    }

    #[test]
    fn test_record_accumulates() {
        let agg = StatsAggregator::new();
        agg.record(&result(1, 1000, 100), Outcome::Compressed);
        agg.record(
            &CompressionResult::unchanged(CandidateId(2), 500, Some(600), Duration::ZERO),
            Outcome::Skipped,
        );
        agg.record(
            &CompressionResult::unchanged(CandidateId(3), 50, None, Duration::ZERO),
            Outcome::Failed(FailureKind::Io),
        );

        let s = agg.snapshot();
        assert_eq!(s.bytes_before, 1550);
        assert_eq!(s.bytes_after, 650);
        assert_eq!(s.saved_bytes(), 900);
        assert_eq!((s.compressed, s.skipped, s.failed), (1, 1, 1));
        assert_eq!(s.failures_by_kind.get(&FailureKind::Io), Some(&1));
    }

    #[test]
    fn test_duplicate_result_is_not_double_counted() {
        let agg = StatsAggregator::new();
        assert!(agg.record(&result(7, 100, 10), Outcome::Compressed));
        assert!(!agg.record(&result(7, 100, 10), Outcome::Compressed));
        let s = agg.snapshot();
        assert_eq!(s.saved_bytes(), 90);
        assert_eq!(s.compressed, 1);
        assert_eq!(s.bytes_before, 100);
    }

    #[test]
    fn test_retry_replaces_previous_outcome() {
        let agg = StatsAggregator::new();
        agg.record(
            &CompressionResult::unchanged(CandidateId(3), 100, None, Duration::ZERO),
            Outcome::Failed(FailureKind::Io),
        );
        agg.record(&result(3, 100, 20), Outcome::Compressed);

        let s = agg.snapshot();
        assert_eq!((s.compressed, s.failed), (1, 0));
        assert!(s.failures_by_kind.is_empty());
        assert_eq!(s.saved_bytes(), 80);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let agg = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        agg.record(&result(t * 1000 + i, 10, 4), Outcome::Compressed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = agg.snapshot();
        assert_eq!(s.compressed, 2000);
        assert_eq!(s.saved_bytes(), 2000 * 6);
    }

    #[test]
    fn test_score_is_monotonic_in_ratio() {
        let low = efficiency_score(2.0, 5.0);
        let high = efficiency_score(4.0, 5.0);
        assert!(high > low);
        assert!((efficiency_score(REFERENCE_RATIO, REFERENCE_SECS_PER_GIB) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_stats_score_zero() {
        assert_eq!(AggregateStats::default().efficiency_score(), 0.0);
        assert_eq!(AggregateStats::default().ratio(), 1.0);
    }
}
