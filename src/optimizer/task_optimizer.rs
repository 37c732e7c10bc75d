//! # Task Optimizer Module
//!
//! Worker per la compressione di un singolo candidato.
//! Separato dall'orchestratore principale per maggiore modularità.
//!
//! ## Protocollo per job:
//! 1. Stream-compress del sorgente in un file temporaneo nella **stessa
//!    directory** (stesso filesystem → il replace è un rename atomico)
//! 2. Confronto `compressed_size < original_size` (stretto)
//! 3. Verifica opzionale: decodifica del temporaneo e confronto SHA-256
//! 4. `fsync`, permessi dell'originale sul temporaneo, rename senza
//!    sovrascrittura nel path finale (`.zst` / `.tar.zst`)
//! 5. Rimozione dell'originale solo dopo il rename riuscito
//!
//! Il temporaneo è un `NamedTempFile`: viene rimosso su ogni percorso di
//! uscita (errore, `NoGain`, panic) finché non è stato rinominato.
//! In ogni istante su disco c'è l'originale, oppure originale + temporaneo
//! completo, oppure solo il sostituto.

use crate::candidate::{CandidateId, CompressionResult, EntryKind, FailureReason};
use crate::config::Config;
use crate::error::OptimizeError;
use crate::fs_ops;
use crate::optimizer::path_resolver::{PathResolver, TEMP_PREFIX, TEMP_SUFFIX};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Progress callbacks fire every this many uncompressed bytes.
pub const PROGRESS_STEP: u64 = 8 * 1024 * 1024;

/// Unità di lavoro assegnata a un worker
#[derive(Debug, Clone)]
pub struct Job {
    pub id: CandidateId,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Esito terminale di un job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Compressed { output_path: PathBuf },
    NoGain,
    Failed(FailureReason),
}

/// Report inviato dal worker al collector
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: CandidateId,
    pub path: PathBuf,
    pub outcome: JobOutcome,
    pub result: CompressionResult,
}

enum Staged {
    Committed { output_path: PathBuf, compressed_size: u64 },
    NoGain { compressed_size: u64 },
}

/// Length and SHA-256 of an uncompressed stream
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamDigest {
    bytes: u64,
    digest: Vec<u8>,
}

/// Writer that hashes and counts everything passing through it, reports
/// progress and enforces the optional job deadline.
struct DigestWriter<'a, W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
    last_report: u64,
    progress: &'a mut dyn FnMut(u64),
    deadline: Option<Instant>,
}

impl<'a, W: Write> DigestWriter<'a, W> {
    fn new(inner: W, progress: &'a mut dyn FnMut(u64), deadline: Option<Instant>) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
            last_report: 0,
            progress,
            deadline,
        }
    }

    fn finish(self) -> (W, StreamDigest) {
        let digest = self.hasher.finalize().to_vec();
        (self.inner, StreamDigest { bytes: self.bytes, digest })
    }
}

impl<W: Write> Write for DigestWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "job exceeded its time limit"));
            }
        }
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        if self.bytes - self.last_report >= PROGRESS_STEP {
            self.last_report = self.bytes;
            (self.progress)(self.bytes);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Worker ottimizzato per elaborazione singoli candidati
#[derive(Debug, Clone)]
pub struct TaskOptimizer {
    level: i32,
    verify: bool,
    timeout: Option<Duration>,
}

impl TaskOptimizer {
    /// Crea nuovo task optimizer
    pub fn new(config: &Config) -> Self {
        Self {
            level: config.compression_level,
            verify: config.verify,
            timeout: config.job_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Processa un singolo candidato. Bloccante: va eseguito fuori dal runtime async.
    pub fn process(&self, job: &Job, progress: &mut dyn FnMut(u64)) -> JobReport {
        let started = Instant::now();
        let mut original_size = 0;

        let staged = self.compress_and_replace(job, progress, &mut original_size);
        let elapsed = started.elapsed();

        let (outcome, result) = match staged {
            Ok(Staged::Committed { output_path, compressed_size }) => {
                info!(
                    "[OK] {}: {} -> {}",
                    job.path.display(),
                    fs_ops::format_size(original_size),
                    fs_ops::format_size(compressed_size)
                );
                (
                    JobOutcome::Compressed { output_path },
                    CompressionResult::committed(job.id, original_size, compressed_size, elapsed),
                )
            }
            Ok(Staged::NoGain { compressed_size }) => {
                debug!(
                    "[SKIP] {}: compressed size {} is not below {}",
                    job.path.display(),
                    compressed_size,
                    original_size
                );
                (
                    JobOutcome::NoGain,
                    CompressionResult::unchanged(job.id, original_size, Some(compressed_size), elapsed),
                )
            }
            Err(e) => {
                warn!("[ERROR] {}: {}", job.path.display(), e);
                (
                    JobOutcome::Failed(e.into_failure()),
                    CompressionResult::unchanged(job.id, original_size, None, elapsed),
                )
            }
        };

        JobReport { id: job.id, path: job.path.clone(), outcome, result }
    }

    fn compress_and_replace(
        &self,
        job: &Job,
        progress: &mut dyn FnMut(u64),
        original_size: &mut u64,
    ) -> Result<Staged, OptimizeError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let before = match job.kind {
            EntryKind::File => {
                let metadata = fs::symlink_metadata(&job.path)?;
                if !metadata.is_file() {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file").into());
                }
                Some((metadata.len(), metadata.modified()?))
            }
            EntryKind::Directory => {
                if !fs::symlink_metadata(&job.path)?.is_dir() {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a real directory").into());
                }
                None
            }
        };
        *original_size = match before {
            Some((len, _)) => len,
            None => fs_ops::dir_size(&job.path),
        };

        let target = PathResolver::compressed_path(&job.path, job.kind)
            .map_err(|e| OptimizeError::Integrity(e.to_string()))?;
        if fs::symlink_metadata(&target).is_ok() {
            return Err(OptimizeError::Integrity(format!(
                "replacement target already exists: {}",
                target.display()
            )));
        }

        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(PathResolver::staging_dir(&job.path))?;
        debug!("Staging {} into {}", job.path.display(), staged.path().display());

        let stream = self.encode(job, staged.as_file_mut(), progress, deadline)?;

        if let Some((len, modified)) = before {
            let (len_now, modified_now) = fs_ops::entry_info(&job.path)?;
            if len_now != len || modified_now != modified || stream.bytes != len {
                return Err(io::Error::new(io::ErrorKind::Other, "source changed during compression").into());
            }
        }

        staged.as_file().sync_all()?;
        let compressed_size = staged.as_file().metadata()?.len();

        // Strict inequality: equal size is not a gain.
        if compressed_size >= *original_size {
            return Ok(Staged::NoGain { compressed_size });
        }

        if self.verify {
            Self::verify_stream(staged.path(), &stream)?;
        }

        staged.as_file().set_permissions(Self::replacement_permissions(job)?)?;

        staged.persist_noclobber(&target).map_err(|e| {
            OptimizeError::Integrity(format!(
                "could not move replacement into place at {}: {}",
                target.display(),
                e.error
            ))
        })?;

        Self::remove_original(job, &target)?;

        Ok(Staged::Committed { output_path: target, compressed_size })
    }

    fn encode(
        &self,
        job: &Job,
        out: &mut File,
        progress: &mut dyn FnMut(u64),
        deadline: Option<Instant>,
    ) -> Result<StreamDigest, OptimizeError> {
        let encoder = zstd::stream::write::Encoder::new(BufWriter::new(out), self.level)
            .map_err(|e| OptimizeError::Compression(format!("cannot initialise encoder: {}", e)))?;
        let mut sink = DigestWriter::new(encoder, progress, deadline);

        match job.kind {
            EntryKind::File => {
                let mut source = BufReader::new(File::open(&job.path)?);
                io::copy(&mut source, &mut sink)?;
            }
            EntryKind::Directory => {
                let name = job
                    .path
                    .file_name()
                    .ok_or_else(|| OptimizeError::Integrity(format!("invalid directory name: {}", job.path.display())))?;
                let mut archive = tar::Builder::new(&mut sink);
                archive.follow_symlinks(false);
                archive.append_dir_all(name, &job.path)?;
                archive.finish()?;
            }
        }

        let (encoder, stream) = sink.finish();
        let mut writer = encoder
            .finish()
            .map_err(|e| OptimizeError::Compression(format!("cannot finish frame: {}", e)))?;
        writer.flush()?;
        Ok(stream)
    }

    /// Decode the staged frame and compare it with what was fed to the encoder.
    fn verify_stream(staged: &Path, expected: &StreamDigest) -> Result<(), OptimizeError> {
        let mut decoder = zstd::stream::read::Decoder::new(File::open(staged)?)
            .map_err(|e| OptimizeError::Compression(format!("cannot open frame: {}", e)))?;
        let mut ignore = |_: u64| {};
        let mut check = DigestWriter::new(io::sink(), &mut ignore, None);
        io::copy(&mut decoder, &mut check)
            .map_err(|e| OptimizeError::Compression(format!("corrupt stream: {}", e)))?;
        let (_, decoded) = check.finish();

        if decoded != *expected {
            return Err(OptimizeError::Compression(format!(
                "verification mismatch: decoded {} bytes ({}), expected {} bytes ({})",
                decoded.bytes,
                hex::encode(&decoded.digest[..8]),
                expected.bytes,
                hex::encode(&expected.digest[..8])
            )));
        }
        debug!("Verified {} ({} bytes)", staged.display(), decoded.bytes);
        Ok(())
    }

    /// Mode the replacement carries: the original file's, or the directory's
    /// without its search bits. Ownership stays with the running user.
    fn replacement_permissions(job: &Job) -> io::Result<fs::Permissions> {
        let permissions = fs::symlink_metadata(&job.path)?.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if job.kind == EntryKind::Directory {
                return Ok(fs::Permissions::from_mode(permissions.mode() & 0o666));
            }
        }
        Ok(permissions)
    }

    /// Remove the original now that the replacement is in place.
    fn remove_original(job: &Job, replacement: &Path) -> Result<(), OptimizeError> {
        match job.kind {
            EntryKind::File => {
                if let Err(e) = fs::remove_file(&job.path) {
                    // Roll back so the original stays the only copy.
                    if let Err(rollback) = fs::remove_file(replacement) {
                        error!(
                            "Both {} and {} remain on disk: {}",
                            job.path.display(),
                            replacement.display(),
                            rollback
                        );
                    }
                    return Err(OptimizeError::Integrity(format!(
                        "could not remove original {}: {}",
                        job.path.display(),
                        e
                    )));
                }
            }
            EntryKind::Directory => {
                // The archive is complete at this point; a partial removal loses no data.
                fs::remove_dir_all(&job.path).map_err(|e| {
                    OptimizeError::Integrity(format!(
                        "archive committed at {} but {} could not be fully removed: {}",
                        replacement.display(),
                        job.path.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::FailureKind;
    use std::io::Read;
    use tempfile::TempDir;

    fn optimizer() -> TaskOptimizer {
        TaskOptimizer::new(&Config { compression_level: 3, ..Default::default() })
    }

    fn job(path: PathBuf, kind: EntryKind) -> Job {
        Job { id: CandidateId(1), path, kind }
    }

    fn decompress(path: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        zstd::stream::read::Decoder::new(File::open(path).unwrap())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn leftover_temps(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| PathResolver::is_staging_temp(&e.path()))
            .count()
    }

    #[test]
    fn test_compress_saves_space() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let content = b"GET /index.html 200\n".repeat(50_000);
        fs::write(&path, &content).unwrap();

        let report = optimizer().process(&job(path.clone(), EntryKind::File), &mut |_: u64| {});

        let output = temp_dir.path().join("app.log.zst");
        assert_eq!(report.outcome, JobOutcome::Compressed { output_path: output.clone() });
        assert!(report.result.compressed_size < report.result.original_size);
        assert_eq!(report.result.original_size, content.len() as u64);
        assert!(!path.exists(), "Original file should be deleted");
        assert_eq!(decompress(&output), content);
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_compress_skips_bad_ratio() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tiny.log");
        fs::write(&path, b"random").unwrap();

        let report = optimizer().process(&job(path.clone(), EntryKind::File), &mut |_: u64| {});

        assert_eq!(report.outcome, JobOutcome::NoGain);
        assert_eq!(report.result.saved_bytes, 0);
        assert_eq!(fs::read(&path).unwrap(), b"random");
        assert!(!temp_dir.path().join("tiny.log.zst").exists());
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_missing_source_fails_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        let report = optimizer().process(&job(temp_dir.path().join("gone.log"), EntryKind::File), &mut |_: u64| {});

        match report.outcome {
            JobOutcome::Failed(reason) => assert_eq!(reason.kind, FailureKind::Io),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_existing_target_is_integrity_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.txt");
        let content = vec![b'z'; 200_000];
        fs::write(&path, &content).unwrap();
        fs::write(temp_dir.path().join("data.txt.zst"), b"unrelated").unwrap();

        let report = optimizer().process(&job(path.clone(), EntryKind::File), &mut |_: u64| {});

        match report.outcome {
            JobOutcome::Failed(reason) => assert_eq!(reason.kind, FailureKind::Integrity),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fs::read(&path).unwrap(), content);
        assert_eq!(fs::read(temp_dir.path().join("data.txt.zst")).unwrap(), b"unrelated");
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_directory_is_archived() {
        let temp_dir = TempDir::new().unwrap();
        let deps = temp_dir.path().join("node_modules");
        fs::create_dir_all(deps.join("pkg")).unwrap();
        fs::write(deps.join("pkg/index.js"), b"module.exports = 1;\n".repeat(5_000)).unwrap();

        let report = optimizer().process(&job(deps.clone(), EntryKind::Directory), &mut |_: u64| {});

        let archive_path = temp_dir.path().join("node_modules.tar.zst");
        assert_eq!(report.outcome, JobOutcome::Compressed { output_path: archive_path.clone() });
        assert!(!deps.exists());

        let decoder = zstd::stream::read::Decoder::new(File::open(&archive_path).unwrap()).unwrap();
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(temp_dir.path()).unwrap();
        assert_eq!(
            fs::read(deps.join("pkg/index.js")).unwrap(),
            b"module.exports = 1;\n".repeat(5_000)
        );
    }

    #[test]
    fn test_progress_is_reported_for_large_input() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.out");
        fs::write(&path, vec![b'q'; (PROGRESS_STEP * 2 + 1) as usize]).unwrap();

        let mut seen = Vec::new();
        let report = optimizer().process(&job(path, EntryKind::File), &mut |bytes: u64| seen.push(bytes));

        assert!(matches!(report.outcome, JobOutcome::Compressed { .. }));
        assert!(seen.len() >= 2);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[cfg(unix)]
    #[test]
    fn test_replacement_keeps_original_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.log");
        fs::write(&path, b"visible to the group\n".repeat(10_000)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let deps = temp_dir.path().join("node_modules");
        fs::create_dir_all(&deps).unwrap();
        fs::write(deps.join("index.js"), b"module.exports = 2;\n".repeat(5_000)).unwrap();
        fs::set_permissions(&deps, fs::Permissions::from_mode(0o755)).unwrap();

        optimizer().process(&job(path, EntryKind::File), &mut |_: u64| {});
        optimizer().process(&job(deps, EntryKind::Directory), &mut |_: u64| {});

        let mode = |name: &str| fs::metadata(temp_dir.path().join(name)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("shared.log.zst"), 0o644);
        assert_eq!(mode("node_modules.tar.zst"), 0o644);
    }

    #[test]
    fn test_deadline_fails_job_and_keeps_original() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("slow.log");
        let content = b"waiting on upstream\n".repeat(50_000);
        fs::write(&path, &content).unwrap();

        let optimizer = TaskOptimizer { level: 3, verify: true, timeout: Some(Duration::ZERO) };
        let report = optimizer.process(&job(path.clone(), EntryKind::File), &mut |_: u64| {});

        match report.outcome {
            JobOutcome::Failed(reason) => {
                assert_eq!(reason.kind, FailureKind::Io);
                assert!(reason.message.contains("time limit"), "{}", reason.message);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.result.saved_bytes, 0);
        assert_eq!(fs::read(&path).unwrap(), content);
        assert!(!temp_dir.path().join("slow.log.zst").exists());
        assert_eq!(leftover_temps(temp_dir.path()), 0);
    }

    #[test]
    fn test_failed_original_removal_rolls_back_replacement() {
        let temp_dir = TempDir::new().unwrap();
        let replacement = temp_dir.path().join("vanished.log.zst");
        fs::write(&replacement, zstd::encode_all(&b"payload"[..], 3).unwrap()).unwrap();

        // The original is already gone, so removing it fails.
        let result = TaskOptimizer::remove_original(
            &job(temp_dir.path().join("vanished.log"), EntryKind::File),
            &replacement,
        );

        assert!(matches!(result, Err(OptimizeError::Integrity(_))));
        assert!(!replacement.exists());
    }

    #[test]
    fn test_verify_detects_corrupt_frame() {
        let temp_dir = TempDir::new().unwrap();
        let frame = temp_dir.path().join("frame.zst");
        fs::write(&frame, zstd::encode_all(&b"hello world"[..], 3).unwrap()).unwrap();

        let expected = StreamDigest { bytes: 11, digest: Sha256::digest(b"hello world").to_vec() };
        assert!(TaskOptimizer::verify_stream(&frame, &expected).is_ok());

        let wrong = StreamDigest { bytes: 11, digest: Sha256::digest(b"hello there").to_vec() };
        assert!(matches!(
            TaskOptimizer::verify_stream(&frame, &wrong),
            Err(OptimizeError::Compression(_))
        ));

        fs::write(&frame, b"not a zstd frame").unwrap();
        assert!(matches!(
            TaskOptimizer::verify_stream(&frame, &expected),
            Err(OptimizeError::Compression(_))
        ));
    }
}
