//! # Progress Bar Module
//!
//! Progress bar visuale con `indicatif` usata dal binario.
//!
//! ## Responsabilità:
//! - Barra principale con candidati terminati / totali
//! - Traduce ogni `ProgressEvent` in un messaggio: byte elaborati durante la
//!   compressione, risparmio o motivo a fine job
//! - Spinner per la fase di scansione (durata indeterminata)
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================>---------------] 150/240 [OK] app.log: 72.4% saved
//! ⠙ [00:02:16] [========================>---------------] 150/240 build.tar: 24.0 MB / 96.0 MB
//! ```

use crate::candidate::CandidateState;
use crate::fs_ops;
use crate::optimizer::ProgressEvent;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Renders the events of a compression run on a terminal bar
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Bar over `total_jobs` candidates
    pub fn new(total_jobs: u64) -> Self {
        let bar = ProgressBar::new(total_jobs);
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Nothing is drawn; used in JSON mode
    pub fn hidden() -> Self {
        Self { bar: ProgressBar::hidden() }
    }

    /// Advance on terminal events, otherwise only refresh the message.
    pub fn record(&self, event: &ProgressEvent) {
        let name = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let message = match &event.state {
            CandidateState::Compressing if event.bytes_processed == 0 => format!("{}: compressing", name),
            CandidateState::Compressing => format!(
                "{}: {} / {}",
                name,
                fs_ops::format_size(event.bytes_processed),
                fs_ops::format_size(event.original_size)
            ),
            CandidateState::Compressed { .. } => {
                let compressed = event.compressed_size.unwrap_or(event.original_size);
                format!(
                    "[OK] {}: {:.1}% saved",
                    name,
                    fs_ops::calculate_reduction(event.original_size, compressed)
                )
            }
            CandidateState::Failed(reason) => format!("[ERROR] {}: {}", name, reason.kind),
            other => format!("[SKIP] {}: {}", name, other),
        };

        if event.is_terminal() {
            self.bar.inc(1);
        }
        self.bar.set_message(message);
    }

    pub fn processed(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Spinner for the scan, whose length is unknown
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }
}
