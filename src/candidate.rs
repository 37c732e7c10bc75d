//! # Candidate Model Module
//!
//! Questo modulo definisce il modello dati dei candidati e la collezione
//! sincronizzata che li contiene.
//!
//! ## Responsabilità:
//! - `CandidateFile`: metadata di un file o directory trovato dallo scanner
//! - `Category` / `CandidateState`: varianti chiuse, gestite in modo esaustivo
//! - `CompressionResult`: prodotto una sola volta per ogni esito terminale
//! - `CandidateTable`: unico proprietario dello stato dei candidati;
//!   ogni transizione passa da qui sotto lock
//!
//! ## Transizioni ammesse (solo in avanti):
//! ```text
//! Pending ──> Compressing ──> Compressed | Skipped(NoGain) | Failed
//!    │                            │
//!    └──> Skipped(*) ─────────────┴──> Removed
//! ```
//! L'unico modo di tornare a `Pending` è `CandidateTable::reset`.

use crate::error::OptimizeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Stable identifier of a candidate. Never reused across scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Dependency,
    BuildArtifact,
    LogFile,
    Generic,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dependency => "dependency",
            Self::BuildArtifact => "build",
            Self::LogFile => "log",
            Self::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Rejected by the classifier; never enqueued.
    NotEligible,
    /// Compressed output was not strictly smaller than the input.
    NoGain,
    /// Already carries the codec suffix.
    AlreadyCompressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Io,
    Compression,
    Integrity,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::Compression => "compression",
            Self::Integrity => "integrity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum CandidateState {
    Pending,
    Compressing,
    Compressed { output_path: PathBuf },
    Skipped(SkipReason),
    Failed(FailureReason),
    Removed,
}

impl CandidateState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Compressing)
    }

    /// Whether `next` is a legal forward step from `self`.
    pub fn can_transition_to(&self, next: &CandidateState) -> bool {
        use CandidateState::*;
        match (self, next) {
            (Pending, Compressing | Skipped(_) | Removed) => true,
            (Compressing, Compressed { .. } | Skipped(SkipReason::NoGain) | Failed(_)) => true,
            (Compressed { .. } | Skipped(_) | Failed(_), Removed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Compressing => f.write_str("compressing"),
            Self::Compressed { .. } => f.write_str("compressed"),
            Self::Skipped(SkipReason::NotEligible) => f.write_str("skipped (not eligible)"),
            Self::Skipped(SkipReason::NoGain) => f.write_str("skipped (no gain)"),
            Self::Skipped(SkipReason::AlreadyCompressed) => f.write_str("skipped (already compressed)"),
            Self::Failed(reason) => write!(f, "failed ({}: {})", reason.kind, reason.message),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// A scanned filesystem entry with its classification and lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFile {
    pub id: CandidateId,
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size_bytes: u64,
    pub modified_time: SystemTime,
    pub category: Category,
    pub state: CandidateState,
}

impl CandidateFile {
    /// Age relative to `now`; entries stamped in the future count as brand new.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified_time).unwrap_or_default()
    }

    pub fn is_pending(&self) -> bool {
        self.state == CandidateState::Pending
    }
}

/// Outcome record for one finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub candidate_id: CandidateId,
    pub original_size: u64,
    /// Size of the compressed stream that was produced, if one was.
    pub compressed_size: u64,
    pub saved_bytes: u64,
    pub ratio: f64,
    pub elapsed: Duration,
}

impl CompressionResult {
    /// Result for a replacement that was committed.
    pub fn committed(candidate_id: CandidateId, original_size: u64, compressed_size: u64, elapsed: Duration) -> Self {
        Self {
            candidate_id,
            original_size,
            compressed_size,
            saved_bytes: original_size.saturating_sub(compressed_size),
            ratio: ratio(original_size, compressed_size),
            elapsed,
        }
    }

    /// Result for a job that left the original in place.
    pub fn unchanged(candidate_id: CandidateId, original_size: u64, attempted_size: Option<u64>, elapsed: Duration) -> Self {
        let compressed_size = attempted_size.unwrap_or(original_size);
        Self {
            candidate_id,
            original_size,
            compressed_size,
            saved_bytes: 0,
            ratio: ratio(original_size, compressed_size),
            elapsed,
        }
    }

    /// Bytes the entry occupies after the job.
    pub fn resulting_size(&self) -> u64 {
        self.original_size - self.saved_bytes
    }
}

fn ratio(original: u64, compressed: u64) -> f64 {
    if compressed == 0 {
        if original == 0 { 1.0 } else { original as f64 }
    } else {
        original as f64 / compressed as f64
    }
}

#[derive(Default)]
struct TableInner {
    entries: BTreeMap<CandidateId, CandidateFile>,
    leased: HashSet<CandidateId>,
    next_id: u64,
}

/// Synchronized collection of all candidates of the current scan
#[derive(Default)]
pub struct CandidateTable {
    inner: Mutex<TableInner>,
}

/// Exclusive hold on a candidate outside the worker pool (used by delete).
/// Workers cannot claim a leased candidate; released on drop.
pub struct CandidateLease<'a> {
    table: &'a CandidateTable,
    pub candidate: CandidateFile,
}

impl Drop for CandidateLease<'_> {
    fn drop(&mut self) {
        self.table.lock().leased.remove(&self.candidate.id);
    }
}

impl CandidateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        // Every mutation is applied whole under the lock, so a poisoned
        // guard still holds consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop all candidates. Ids keep increasing so stale ids never alias.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.leased.clear();
    }

    /// Insert a new candidate, assigning its id.
    pub fn insert(&self, mut candidate: CandidateFile) -> CandidateFile {
        let mut inner = self.lock();
        let id = CandidateId(inner.next_id);
        inner.next_id += 1;
        candidate.id = id;
        inner.entries.insert(id, candidate.clone());
        candidate
    }

    pub fn get(&self, id: CandidateId) -> Option<CandidateFile> {
        self.lock().entries.get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<CandidateFile> {
        self.lock().entries.values().cloned().collect()
    }

    /// Grant a worker exclusive access: Pending -> Compressing.
    pub fn claim(&self, id: CandidateId) -> Result<CandidateFile, OptimizeError> {
        let mut inner = self.lock();
        if inner.leased.contains(&id) {
            return Err(OptimizeError::Busy(format!("candidate {} is being removed", id)));
        }
        let entry = inner.entries.get_mut(&id).ok_or(OptimizeError::UnknownCandidate(id))?;
        if entry.state != CandidateState::Pending {
            return Err(OptimizeError::InvalidState { id, state: entry.state.clone() });
        }
        entry.state = CandidateState::Compressing;
        Ok(entry.clone())
    }

    /// Apply a forward transition, rejecting anything that would move backwards.
    pub fn transition(&self, id: CandidateId, next: CandidateState) -> Result<CandidateFile, OptimizeError> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or(OptimizeError::UnknownCandidate(id))?;
        if !entry.state.can_transition_to(&next) {
            return Err(OptimizeError::InvalidState { id, state: entry.state.clone() });
        }
        entry.state = next;
        Ok(entry.clone())
    }

    /// Explicit reset of a retryable candidate back to Pending.
    pub fn reset(&self, id: CandidateId) -> Result<CandidateFile, OptimizeError> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or(OptimizeError::UnknownCandidate(id))?;
        match entry.state {
            CandidateState::Skipped(SkipReason::NoGain) | CandidateState::Failed(_) => {
                entry.state = CandidateState::Pending;
                Ok(entry.clone())
            }
            CandidateState::Pending => Ok(entry.clone()),
            _ => Err(OptimizeError::InvalidState { id, state: entry.state.clone() }),
        }
    }

    /// Take an exclusive lease for an out-of-pool operation. Refused while
    /// a worker owns the candidate or after it has been removed.
    pub fn lease(&self, id: CandidateId) -> Result<CandidateLease<'_>, OptimizeError> {
        let mut inner = self.lock();
        let entry = inner.entries.get(&id).ok_or(OptimizeError::UnknownCandidate(id))?;
        if matches!(entry.state, CandidateState::Compressing | CandidateState::Removed) {
            return Err(OptimizeError::InvalidState { id, state: entry.state.clone() });
        }
        let candidate = entry.clone();
        if !inner.leased.insert(id) {
            return Err(OptimizeError::Busy(format!("candidate {} is already leased", id)));
        }
        Ok(CandidateLease { table: self, candidate })
    }
}
