//! # Space Artifact Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Creazione della configurazione (file JSON + override da CLI)
//! - Scansione, compressione dei candidati eleggibili e riepilogo finale
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (root, livello, soglie, workers, etc.)
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose, `RUST_LOG` se presente)
//! 3. Istanzia l'`Orchestrator` (la configurazione viene validata qui)
//! 4. Scansiona la root e, se non `--scan-only`, comprime i candidati Pending
//! 5. Stampa il riepilogo e aggiorna lo storico della root
//!
//! ## Esempio di utilizzo:
//! ```bash
//! artifact-optimizer ~/code --level 19 --workers 8 --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use space_artifact_optimizer::{
    fs_ops, CandidateId, CandidateState, Config, HistoryLog, JsonMessage, Orchestrator, ProgressEvent,
    ProgressManager, RunRecord, RunSummary,
};

#[derive(Parser)]
#[command(name = "artifact-optimizer")]
#[command(about = "Compress stale logs, dependency trees and build outputs in place, losslessly")]
struct Args {
    /// Root directory to scan
    root: PathBuf,

    /// JSON configuration file (CLI flags override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// zstd compression level (1-22)
    #[arg(short, long)]
    level: Option<i32>,

    /// Minimum size in bytes for generic files
    #[arg(long)]
    min_size: Option<u64>,

    /// Minimum age in days for log files
    #[arg(long)]
    stale_days: Option<u64>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Abort a single job after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip decoding the compressed output before replacing the original
    #[arg(long)]
    no_verify: bool,

    /// Descend into hidden directories
    #[arg(long)]
    include_hidden: bool,

    /// List candidates without compressing anything
    #[arg(long)]
    scan_only: bool,

    /// Emit JSON lines on stdout instead of human-readable output
    #[arg(long)]
    json: bool,

    /// Do not record this run in the history file
    #[arg(long)]
    no_history: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(level) = self.level {
            config.compression_level = level;
        }
        if let Some(min_size) = self.min_size {
            config.min_file_size_bytes = min_size;
        }
        if let Some(days) = self.stale_days {
            config.stale_age_days = days;
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if self.timeout.is_some() {
            config.job_timeout_secs = self.timeout;
        }
        if self.no_verify {
            config.verify = false;
        }
        if self.include_hidden {
            config.skip_hidden = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = run(&args).await;
    if let Err(ref e) = result {
        if args.json {
            JsonMessage::error(e.to_string(), e.chain().nth(1).map(|cause| cause.to_string())).emit();
        }
    }
    result
}

async fn run(args: &Args) -> Result<()> {
    let base = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    let orchestrator = Orchestrator::new(args.apply(base))?;
    let root = args.root.canonicalize().unwrap_or_else(|_| args.root.clone());

    if args.json {
        JsonMessage::start(root.clone(), args.scan_only, orchestrator.config()).emit();
    } else {
        info!("Scanning {}", root.display());
    }

    let spinner = (!args.json).then(|| ProgressManager::spinner("Scanning..."));
    let mut found = 0usize;
    for candidate in orchestrator.scan(&root)? {
        found += 1;
        if args.json {
            JsonMessage::candidate(&candidate).emit();
        } else if let Some(spinner) = &spinner {
            spinner.set_message(format!("Scanning... {} entries", found));
        }
    }
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let pending = orchestrator.pending_ids();
    if !args.json {
        info!("Found {} entries, {} eligible for compression", found, pending.len());
        for (category, count, bytes) in orchestrator.pending_by_category() {
            info!("  • {}: {} entries, {}", category.label(), count, fs_ops::format_size(bytes));
        }
    }

    if args.scan_only {
        if !args.json {
            print_candidates(&orchestrator);
        }
        return Ok(());
    }

    let summary = compress(&orchestrator, pending, args.json).await;
    let stats = orchestrator.stats();

    let history = if args.no_history || stats.jobs() == 0 {
        None
    } else {
        match record_history(&root, &orchestrator).await {
            Ok(log) => Some(log.totals()),
            Err(e) => {
                warn!("Could not update history: {}", e);
                None
            }
        }
    };

    if args.json {
        JsonMessage::complete(summary, stats, history).emit();
        return Ok(());
    }

    info!("=== Compression Complete ===");
    info!("{}", summary.format_summary());
    info!("{}", stats.format_summary());
    for (kind, count) in &stats.failures_by_kind {
        info!("  {} failures: {}", kind, count);
    }
    for candidate in orchestrator.candidates() {
        if let CandidateState::Failed(reason) = &candidate.state {
            warn!("  {} ({}): {}", candidate.path.display(), reason.kind, reason.message);
        }
    }
    if let Some(history) = history {
        info!("--- Historical Stats ---");
        info!("Runs recorded: {}", history.runs);
        info!("Total bytes saved historically: {}", fs_ops::format_size(history.total_bytes_saved));
        info!("Average historical reduction: {:.2}%", history.average_reduction);
    }

    Ok(())
}

/// Run the pool over `pending`, rendering events until every job has finished.
/// Ctrl-C stops dispatching; in-flight jobs still complete.
async fn compress(
    orchestrator: &Orchestrator,
    pending: Vec<CandidateId>,
    json: bool,
) -> RunSummary {
    let progress = if json {
        ProgressManager::hidden()
    } else {
        ProgressManager::new(pending.len() as u64)
    };

    let mut handle = orchestrator.start_compression(pending);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => render_event(&progress, event, json),
                None => break,
            },
            _ = &mut ctrl_c, if !cancelled => {
                warn!("Interrupted: finishing in-flight jobs, no new jobs will start");
                orchestrator.cancel();
                cancelled = true;
            }
        }
    }

    let summary = handle.wait().await;
    progress.finish(&summary.format_summary());
    summary
}

fn render_event(progress: &ProgressManager, event: ProgressEvent, json: bool) {
    if json {
        JsonMessage::event(event).emit();
    } else {
        progress.record(&event);
    }
}

fn print_candidates(orchestrator: &Orchestrator) {
    for candidate in orchestrator.candidates() {
        println!(
            "{:>6}  {:<10} {:>10}  {:<30} {}",
            candidate.id.to_string(),
            candidate.category.label(),
            fs_ops::format_size(candidate.size_bytes),
            candidate.state.to_string(),
            candidate.path.display()
        );
    }
}

async fn record_history(root: &Path, orchestrator: &Orchestrator) -> Result<HistoryLog> {
    let mut log = HistoryLog::open(root).await?;
    log.append(RunRecord::new(root, &orchestrator.stats())).await?;
    Ok(log)
}
