//! Initialization progress reports
//!
//! Engines emit these while loading. The UI only shows a short label, the
//! text before the first `:`.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One progress report emitted during engine initialization
#[derive(Debug, Clone, PartialEq)]
pub struct InitProgress {
    /// Fraction complete in `0.0..=1.0`
    pub progress: f32,
    /// Human readable description, e.g. `"Loading model weights: llama-3.gguf"`
    pub text: String,
    /// Time since initialization started
    pub elapsed: Duration,
}

impl InitProgress {
    pub fn new(progress: f32, text: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            text: text.into(),
            elapsed,
        }
    }

    /// Short display label: the text up to the first `:`, trimmed.
    pub fn label(&self) -> &str {
        self.text.split(':').next().unwrap_or_default().trim()
    }
}

/// Channel end an engine loader reports progress on
pub type ProgressSender = mpsc::UnboundedSender<InitProgress>;

/// Stamps reports with the elapsed time since creation and sends them.
///
/// Reports are informational; a closed channel is ignored.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: ProgressSender,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(tx: ProgressSender) -> Self {
        Self {
            tx,
            started: Instant::now(),
        }
    }

    pub fn report(&self, progress: f32, text: impl Into<String>) {
        let report = InitProgress::new(progress, text, self.started.elapsed());
        tracing::debug!(progress = report.progress, "{}", report.text);
        let _ = self.tx.send(report);
    }
}
