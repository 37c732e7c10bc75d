//! # Scanner Module
//!
//! Discovery ricorsiva delle entry candidate a partire da una directory root.
//!
//! ## Responsabilità:
//! - Visita lazy dell'albero (`ScanIter` è un `Iterator`, ogni `scan` riparte da zero)
//! - Segue i symlink a directory ma tiene un insieme di path canonici già
//!   visitati, così un ciclo o due link allo stesso target non vengono contati due volte
//! - I link a file non sono candidati: il file reale viene restituito col suo path
//! - Le directory artefatto (node_modules, target, ...) vengono restituite come
//!   singola entry e non vengono attraversate
//! - Errori per-entry (permessi, file spariti) sono non fatali: l'entry viene
//!   omessa e la visita continua
//! - Rimuove i file temporanei orfani di un'esecuzione interrotta
//!
//! ## Policy:
//! - `.git` non viene mai attraversata
//! - Directory nascoste potate se `skip_hidden` (configurazione, non invariante)

use crate::candidate::EntryKind;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::fs_ops;
use crate::optimizer::path_resolver::PathResolver;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Raw metadata of a discovered entry
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size_bytes: u64,
    pub modified_time: SystemTime,
}

/// Walks directory trees
#[derive(Debug, Clone)]
pub struct Scanner {
    classifier: Classifier,
    skip_hidden: bool,
    purge_stale_temps: bool,
}

impl Scanner {
    pub fn new(config: &Config) -> Self {
        Self {
            classifier: Classifier::new(config),
            skip_hidden: config.skip_hidden,
            purge_stale_temps: config.purge_stale_temps,
        }
    }

    /// Start a fresh traversal of `root`. Nothing is read until the iterator is polled.
    pub fn scan(&self, root: &Path) -> ScanIter {
        ScanIter {
            walker: WalkDir::new(root).follow_links(true).into_iter(),
            visited: HashSet::new(),
            classifier: self.classifier.clone(),
            skip_hidden: self.skip_hidden,
            purge_stale_temps: self.purge_stale_temps,
        }
    }
}

/// Lazy traversal state of a single scan
pub struct ScanIter {
    walker: walkdir::IntoIter,
    visited: HashSet<PathBuf>,
    classifier: Classifier,
    skip_hidden: bool,
    purge_stale_temps: bool,
}

impl ScanIter {
    /// Records the canonical path; false when it was already seen.
    fn first_visit(&mut self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => self.visited.insert(canonical),
            Err(e) => {
                debug!("Cannot canonicalize {}: {}", path.display(), e);
                false
            }
        }
    }

    fn purge_temp(&self, path: &Path) {
        if !self.purge_stale_temps {
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => info!("Discarded stale temp file from an interrupted run: {}", path.display()),
            Err(e) => debug!("Could not discard stale temp file {}: {}", path.display(), e),
        }
    }
}

impl Iterator for ScanIter {
    type Item = ScannedEntry;

    fn next(&mut self) -> Option<ScannedEntry> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_dir() {
                // A linked artifact dir cannot be replaced in place; its target is reached directly.
                if entry.path_is_symlink() && self.classifier.artifact_category(&entry.file_name().to_string_lossy()).is_some() {
                    debug!("Not archiving linked artifact directory: {}", path.display());
                    self.walker.skip_current_dir();
                    continue;
                }
                if !self.first_visit(path) {
                    debug!("Already visited, not descending: {}", path.display());
                    self.walker.skip_current_dir();
                    continue;
                }
                if entry.depth() == 0 {
                    continue;
                }

                let name = entry.file_name().to_string_lossy();
                if name == ".git" {
                    self.walker.skip_current_dir();
                    continue;
                }
                if self.classifier.artifact_category(&name).is_some() {
                    self.walker.skip_current_dir();
                    let modified_time = entry
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    return Some(ScannedEntry {
                        path: path.to_path_buf(),
                        kind: EntryKind::Directory,
                        size_bytes: fs_ops::dir_size(path),
                        modified_time,
                    });
                }
                if self.skip_hidden && name.starts_with('.') {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            if PathResolver::is_staging_temp(path) {
                self.purge_temp(path);
                continue;
            }

            // Only the real file is a candidate. The link is left alone and not
            // recorded, so the target is still yielded under its own path.
            if entry.path_is_symlink() {
                debug!("Skipping file link: {}", path.display());
                continue;
            }

            if !self.first_visit(path) {
                debug!("Already visited through another link: {}", path.display());
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            return Some(ScannedEntry {
                path: path.to_path_buf(),
                kind: EntryKind::File,
                size_bytes: metadata.len(),
                modified_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
    }
}
