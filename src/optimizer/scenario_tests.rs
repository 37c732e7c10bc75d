//! End-to-end scenarios driving the orchestrator against real temp trees.

use crate::candidate::{CandidateId, CandidateState, Category, SkipReason};
use crate::config::Config;
use crate::error::OptimizeError;
use crate::optimizer::orchestrator::Orchestrator;
use crate::optimizer::progress_tracker::ProgressEvent;
use crate::optimizer::path_resolver::PathResolver;
use futures::StreamExt;
use rand::RngCore;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

fn config() -> Config {
    Config { compression_level: 3, worker_count: 4, ..Default::default() }
}

fn decompress(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    zstd::stream::read::Decoder::new(File::open(path).unwrap())
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    out
}

fn set_age(path: &Path, age: Duration) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

fn scan_ids(orchestrator: &Orchestrator, root: &Path) -> Vec<CandidateId> {
    orchestrator.scan(root).unwrap().map(|c| c.id).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeating_pattern_compresses_losslessly() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pattern.bin");
    let content = vec![0xABu8; 100 * MIB];
    fs::write(&path, &content).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let ids = scan_ids(&orchestrator, temp_dir.path());
    let events: Vec<ProgressEvent> = orchestrator.start_compression(ids.clone()).collect().await;

    let last = events.last().unwrap();
    let compressed_size = last.compressed_size.unwrap();
    assert!(matches!(last.state, CandidateState::Compressed { .. }));
    assert!(compressed_size < 64 * 1024, "got {} bytes", compressed_size);
    assert!(last.original_size as f64 / compressed_size as f64 > 1000.0);
    assert!(events.iter().any(|e| e.bytes_processed > 0 && !e.is_terminal()));

    assert!(!path.exists());
    assert_eq!(decompress(&temp_dir.path().join("pattern.bin.zst")), content);
    assert_eq!(orchestrator.stats().saved_bytes(), content.len() as u64 - compressed_size);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dense_data_is_left_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("archive.bin");
    let mut content = vec![0u8; 10 * MIB];
    rand::thread_rng().fill_bytes(&mut content);
    fs::write(&path, &content).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let ids = scan_ids(&orchestrator, temp_dir.path());
    let summary = orchestrator.start_compression(ids.clone()).wait().await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.saved_bytes(), 0);
    assert_eq!(orchestrator.candidate(ids[0]).unwrap().state, CandidateState::Skipped(SkipReason::NoGain));
    assert_eq!(fs::read(&path).unwrap(), content);
    assert!(!temp_dir.path().join("archive.bin.zst").exists());
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_thousand_files_pool_of_eight() {
    let temp_dir = TempDir::new().unwrap();
    let mut expected_before = 0u64;
    for i in 0..1000 {
        let dir = temp_dir.path().join(format!("d{}", i % 10));
        fs::create_dir_all(&dir).unwrap();
        let content = format!("record {} ok\n", i).repeat(200);
        expected_before += content.len() as u64;
        fs::write(dir.join(format!("f{}.dat", i)), content).unwrap();
    }

    let orchestrator = Orchestrator::new(Config { worker_count: 8, min_file_size_bytes: 1, ..config() }).unwrap();
    let ids = scan_ids(&orchestrator, temp_dir.path());
    assert_eq!(ids.len(), 1000);

    let mut handle = orchestrator.start_compression(ids);
    let mut terminal_events: HashMap<CandidateId, usize> = HashMap::new();
    let mut saved_from_events = 0u64;
    while let Some(event) = handle.next_event().await {
        if event.is_terminal() {
            *terminal_events.entry(event.candidate_id).or_default() += 1;
            if let (CandidateState::Compressed { .. }, Some(compressed)) = (&event.state, event.compressed_size) {
                saved_from_events += event.original_size - compressed;
            }
        }
    }
    let summary = handle.wait().await;

    assert_eq!(summary.dispatched, 1000);
    assert_eq!(terminal_events.len(), 1000);
    assert!(terminal_events.values().all(|&n| n == 1));
    assert!(orchestrator.candidates().iter().all(|c| c.state.is_terminal()));

    let stats = orchestrator.stats();
    assert_eq!(stats.jobs(), 1000);
    assert_eq!(stats.bytes_before, expected_before);
    assert_eq!(stats.saved_bytes(), saved_from_events);
    assert_eq!(stats.saved_bytes(), summary.saved_bytes());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_young_log_never_enters_pool() {
    let temp_dir = TempDir::new().unwrap();
    let live = temp_dir.path().join("server.log");
    fs::write(&live, b"request served\n".repeat(200_000)).unwrap();
    let stale = temp_dir.path().join("old.log");
    fs::write(&stale, b"request served\n".repeat(200_000)).unwrap();
    set_age(&stale, Duration::from_secs(40 * 24 * 3600));

    let orchestrator = Orchestrator::new(config()).unwrap();
    let candidates: Vec<_> = orchestrator.scan(temp_dir.path()).unwrap().collect();
    let live_candidate = candidates.iter().find(|c| c.path == live).unwrap();
    assert_eq!(live_candidate.category, Category::LogFile);
    assert_eq!(live_candidate.state, CandidateState::Skipped(SkipReason::NotEligible));

    let handle = orchestrator.start_compression(candidates.iter().map(|c| c.id));
    assert_eq!(handle.queued(), 1);
    let events: Vec<_> = handle.collect().await;

    assert!(events.iter().all(|e| e.candidate_id != live_candidate.id));
    assert!(live.exists());
    assert!(temp_dir.path().join("old.log.zst").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rerun_is_a_no_op() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("a.bin"), vec![3u8; 2 * MIB]).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let ids = scan_ids(&orchestrator, temp_dir.path());
    orchestrator.start_compression(ids.clone()).wait().await;
    let stats = orchestrator.stats();

    let again = orchestrator.start_compression(ids.clone());
    assert_eq!(again.queued(), 0);
    let summary = again.wait().await;
    assert_eq!(summary.dispatched, 0);
    assert_eq!(orchestrator.stats(), stats);
    assert!(matches!(orchestrator.reset(ids[0]), Err(OptimizeError::InvalidState { .. })));

    // A fresh scan sees the replacement as already compressed.
    let rescanned: Vec<_> = orchestrator.scan(temp_dir.path()).unwrap().collect();
    assert_eq!(rescanned.len(), 1);
    assert_eq!(rescanned[0].state, CandidateState::Skipped(SkipReason::AlreadyCompressed));
    assert!(orchestrator.pending_ids().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupted_run_leaves_one_valid_copy() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let content = vec![9u8; 2 * MIB];

    // Crash before the rename: original plus a partial temp file.
    let before_rename = root.join("before.bin");
    fs::write(&before_rename, &content).unwrap();
    fs::write(root.join(".sao-k3Jx9Q.tmp"), b"partial frame").unwrap();

    // Crash after the rename: original plus complete replacement.
    let after_rename = root.join("after.bin");
    fs::write(&after_rename, &content).unwrap();
    fs::write(root.join("after.bin.zst"), zstd::encode_all(&content[..], 3).unwrap()).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let candidates: Vec<_> = orchestrator.scan(root).unwrap().collect();
    assert!(!root.join(".sao-k3Jx9Q.tmp").exists());
    assert_eq!(candidates.len(), 3);

    let summary = orchestrator.start_compression(candidates.iter().map(|c| c.id)).wait().await;
    assert_eq!(summary.compressed, 1);
    assert_eq!(summary.failed, 1);

    assert_eq!(decompress(&root.join("before.bin.zst")), content);
    assert!(!before_rename.exists());

    // The existing replacement is never clobbered and the original survives.
    assert_eq!(fs::read(&after_rename).unwrap(), content);
    assert_eq!(decompress(&root.join("after.bin.zst")), content);
    let failed = orchestrator.candidates().into_iter().find(|c| c.path == after_rename).unwrap();
    assert!(matches!(failed.state, CandidateState::Failed(_)));

    let leftovers = fs::read_dir(root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| PathResolver::is_staging_temp(&e.path()))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_stops_dispatch() {
    let temp_dir = TempDir::new().unwrap();
    for i in 0..40 {
        fs::write(temp_dir.path().join(format!("f{}.bin", i)), vec![i as u8; 2 * MIB]).unwrap();
    }

    let orchestrator = Orchestrator::new(Config { worker_count: 1, ..config() }).unwrap();
    let ids = scan_ids(&orchestrator, temp_dir.path());
    let handle = orchestrator.start_compression(ids);
    orchestrator.cancel();
    let summary = handle.wait().await;

    assert!(summary.cancelled);
    assert_eq!(summary.dispatched + summary.not_dispatched, 40);
    assert!(summary.not_dispatched > 0);

    let candidates = orchestrator.candidates();
    let pending = candidates.iter().filter(|c| c.is_pending()).count();
    let terminal = candidates.iter().filter(|c| c.state.is_terminal()).count();
    assert_eq!(pending, summary.not_dispatched);
    assert_eq!(terminal, summary.dispatched);
    assert_eq!(orchestrator.stats().jobs(), summary.dispatched);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_after_compression_removes_replacement() {
    let temp_dir = TempDir::new().unwrap();
    let deps = temp_dir.path().join("web/node_modules/pkg");
    fs::create_dir_all(&deps).unwrap();
    fs::write(deps.join("index.js"), b"exports.x = 1;\n".repeat(10_000)).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let candidates: Vec<_> = orchestrator.scan(temp_dir.path()).unwrap().collect();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].category, Category::Dependency);
    let id = candidates[0].id;

    orchestrator.start_compression([id]).wait().await;
    let archive = temp_dir.path().join("web/node_modules.tar.zst");
    assert!(archive.exists());
    assert!(!temp_dir.path().join("web/node_modules").exists());

    let archive_size = fs::metadata(&archive).unwrap().len();
    assert!(matches!(orchestrator.delete(id, false), Err(OptimizeError::NotConfirmed(_))));
    assert_eq!(orchestrator.delete(id, true).unwrap(), archive_size);
    assert!(!archive.exists());
    assert_eq!(orchestrator.stats().removed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_allows_retry_without_double_counting() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("noise.bin");
    let mut content = vec![0u8; 2 * MIB];
    rand::thread_rng().fill_bytes(&mut content);
    fs::write(&path, &content).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let ids = scan_ids(&orchestrator, temp_dir.path());
    orchestrator.start_compression(ids.clone()).wait().await;
    assert_eq!(orchestrator.candidate(ids[0]).unwrap().state, CandidateState::Skipped(SkipReason::NoGain));

    assert!(orchestrator.reset(ids[0]).unwrap().is_pending());
    let summary = orchestrator.start_compression(ids.clone()).wait().await;
    assert_eq!(summary.dispatched, 1);

    let stats = orchestrator.stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.bytes_before, content.len() as u64);
    assert_eq!(fs::read(&path).unwrap(), content);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_linked_log_compresses_its_target() {
    use std::os::unix::fs::symlink;

    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("logs")).unwrap();
    let target = root.join("logs/app-2024.dat");
    let content = b"rotated entry\n".repeat(150_000);
    fs::write(&target, &content).unwrap();
    symlink(&target, root.join("current.dat")).unwrap();

    let orchestrator = Orchestrator::new(config()).unwrap();
    let ids = scan_ids(&orchestrator, root);
    assert_eq!(ids.len(), 1);
    let summary = orchestrator.start_compression(ids).wait().await;

    assert_eq!(summary.compressed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(decompress(&root.join("logs/app-2024.dat.zst")), content);
    assert!(fs::symlink_metadata(root.join("current.dat")).unwrap().file_type().is_symlink());
}
