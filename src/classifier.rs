//! # Classifier Module
//!
//! Valutazione deterministica delle regole per ogni entry trovata dallo scanner.
//!
//! ## Regole (in ordine di priorità):
//! 1. Nome directory tra i pattern noti (dipendenze, build output)
//!    → `Dependency` / `BuildArtifact`, sempre eleggibile
//! 2. Suffisso del codec (`.zst`) → `Skipped(AlreadyCompressed)`
//! 3. Estensione log **e** età ≥ soglia → `LogFile`, eleggibile;
//!    un log più giovane della soglia è considerato attivo → `Skipped(NotEligible)`
//! 4. Altrimenti → `Generic`, eleggibile solo se size ≥ minimo
//!
//! La classificazione è pura: non tocca mai il contenuto dei file.

use crate::candidate::{CandidateState, Category, EntryKind, SkipReason};
use crate::config::Config;
use crate::optimizer::path_resolver::PathResolver;
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Metadata the classifier decides on
#[derive(Debug, Clone)]
pub struct EntryMetadata<'a> {
    pub path: &'a Path,
    pub kind: EntryKind,
    pub size_bytes: u64,
    pub modified_time: SystemTime,
}

/// Category plus the initial lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub state: CandidateState,
}

impl Classification {
    fn eligible(category: Category) -> Self {
        Self { category, state: CandidateState::Pending }
    }

    fn skipped(category: Category, reason: SkipReason) -> Self {
        Self { category, state: CandidateState::Skipped(reason) }
    }

    pub fn is_eligible(&self) -> bool {
        self.state == CandidateState::Pending
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    dependency_dirs: HashSet<String>,
    build_dirs: HashSet<String>,
    log_extensions: HashSet<String>,
    stale_age: Duration,
    min_file_size: u64,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        Self {
            dependency_dirs: config.dependency_dirs.iter().cloned().collect(),
            build_dirs: config.build_dirs.iter().cloned().collect(),
            log_extensions: config.log_extensions.iter().map(|e| e.to_lowercase()).collect(),
            stale_age: config.stale_age(),
            min_file_size: config.min_file_size_bytes,
        }
    }

    /// Category of a directory whose name matches a known artifact pattern.
    pub fn artifact_category(&self, dir_name: &str) -> Option<Category> {
        if self.dependency_dirs.contains(dir_name) {
            Some(Category::Dependency)
        } else if self.build_dirs.contains(dir_name) {
            Some(Category::BuildArtifact)
        } else {
            None
        }
    }

    fn is_log(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let by_extension = path
            .extension()
            .map(|ext| self.log_extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false);
        // rotated logs: app.log.1, app.log.2023-01-01
        by_extension || name.contains(".log.")
    }

    pub fn classify(&self, entry: &EntryMetadata<'_>, now: SystemTime) -> Classification {
        if entry.kind == EntryKind::Directory {
            let name = entry.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            return match self.artifact_category(&name) {
                Some(category) => Classification::eligible(category),
                None => Classification::skipped(Category::Generic, SkipReason::NotEligible),
            };
        }

        if PathResolver::has_codec_suffix(entry.path) {
            return Classification::skipped(Category::Generic, SkipReason::AlreadyCompressed);
        }

        if self.is_log(entry.path) {
            let age = now.duration_since(entry.modified_time).unwrap_or_default();
            return if age >= self.stale_age {
                Classification::eligible(Category::LogFile)
            } else {
                Classification::skipped(Category::LogFile, SkipReason::NotEligible)
            };
        }

        if entry.size_bytes >= self.min_file_size {
            Classification::eligible(Category::Generic)
        } else {
            Classification::skipped(Category::Generic, SkipReason::NotEligible)
        }
    }
}
