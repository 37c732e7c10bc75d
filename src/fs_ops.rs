//! # File Operations Module
//!
//! Questo modulo raccoglie le operazioni sui file condivise da scanner,
//! worker e orchestratore.
//!
//! ## Responsabilità:
//! - Metadata di file e directory (dimensione, modification time)
//! - Dimensione ricorsiva delle directory artefatto
//! - Rimozione di file o directory (usata da Delete)
//! - Formattazione human-readable delle dimensioni
//! - Calcolo percentuali di riduzione
//!
//! ## Esempio:
//! ```rust,ignore
//! let size = dir_size(Path::new("node_modules"));
//! println!("{}", format_size(size));
//! ```

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Size and modification time of a single path (symlinks are followed).
pub fn entry_info(path: &Path) -> io::Result<(u64, SystemTime)> {
    let metadata = fs::metadata(path)?;
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Ok((metadata.len(), modified))
}

/// Sum of regular file sizes below `path`. Unreadable entries count as zero.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Bytes currently occupied by a file or directory.
pub fn occupied_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        Ok(dir_size(path))
    } else {
        Ok(metadata.len())
    }
}

/// Remove a file or a whole directory tree. Returns the bytes it occupied.
pub fn remove_entry(path: &Path) -> io::Result<u64> {
    let size = occupied_size(path)?;
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    debug!("Removed {} ({})", path.display(), format_size(size));
    Ok(size)
}

/// Get human-readable file size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Calculate percentage reduction
pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_calculate_reduction() {
        assert_eq!(calculate_reduction(0, 0), 0.0);
        assert_eq!(calculate_reduction(200, 50), 75.0);
    }

    #[test]
    fn test_dir_size_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let tree = temp_dir.path().join("node_modules");
        fs::create_dir_all(tree.join("pkg/lib")).unwrap();
        fs::write(tree.join("pkg/index.js"), vec![b'a'; 100]).unwrap();
        fs::write(tree.join("pkg/lib/util.js"), vec![b'b'; 50]).unwrap();

        assert_eq!(dir_size(&tree), 150);
        assert_eq!(remove_entry(&tree).unwrap(), 150);
        assert!(!tree.exists());
    }

    #[test]
    fn test_remove_missing_entry_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(remove_entry(&temp_dir.path().join("missing")).is_err());
    }
}
