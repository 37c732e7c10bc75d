//! # Path Resolution Module
//!
//! Centralizza tutta la logica di calcolo dei path di output e dei file temporanei.
//! Evita duplicazione tra scanner, classifier e TaskOptimizer.
//!
//! - File: `nome.ext` → `nome.ext.zst`
//! - Directory: `nome` → `nome.tar.zst`
//! - Temporanei: `.sao-<random>.tmp` nella stessa directory del sorgente,
//!   quindi sullo stesso filesystem e rinominabili in modo atomico

use crate::candidate::EntryKind;
use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const CODEC_SUFFIX: &str = ".zst";
pub const ARCHIVE_SUFFIX: &str = ".tar.zst";
pub const TEMP_PREFIX: &str = ".sao-";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Utility per calcolare i path di output in modo centralizzato
pub struct PathResolver;

impl PathResolver {
    /// Calcola il path finale del file compresso
    pub fn compressed_path(input_path: &Path, kind: EntryKind) -> Result<PathBuf> {
        let file_name = input_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", input_path.display()))?;

        let mut name = OsString::from(file_name);
        name.push(match kind {
            EntryKind::File => CODEC_SUFFIX,
            EntryKind::Directory => ARCHIVE_SUFFIX,
        });
        Ok(input_path.with_file_name(name))
    }

    /// Directory in cui creare il file temporaneo (stesso filesystem del sorgente)
    pub fn staging_dir(input_path: &Path) -> PathBuf {
        match input_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Il nome termina con il suffisso del codec?
    pub fn has_codec_suffix(path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().to_lowercase().ends_with(CODEC_SUFFIX))
            .unwrap_or(false)
    }

    /// Riconosce un file temporaneo lasciato da un'esecuzione interrotta
    pub fn is_staging_temp(path: &Path) -> bool {
        path.file_name()
            .map(|n| {
                let name = n.to_string_lossy();
                name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
            })
            .unwrap_or(false)
    }
}
