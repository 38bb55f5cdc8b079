//! Progress tracking and reporting for batch runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::discovery::SourceFile;
use crate::processing::{ConversionOutcome, OutcomeKind};

use super::Summary;

/// Thread-safe counters for a running batch
pub struct ProgressTracker {
    start_time: Instant,
    total_files: usize,
    converted: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

/// Snapshot of a batch's progress
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_files: usize,
    pub converted_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub elapsed_time: Duration,
    pub estimated_remaining: Option<Duration>,
    pub files_per_second: f64,
    pub completion_percentage: f64,
}

impl ProgressTracker {
    /// Start tracking a batch of `total_files`
    pub fn new(total_files: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_files,
            converted: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Count a finished file
    pub fn record(&self, kind: OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Converted => &self.converted,
            OutcomeKind::Skipped => &self.skipped,
            OutcomeKind::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current progress
    pub fn state(&self) -> ProgressState {
        let elapsed = self.start_time.elapsed();
        let converted = self.converted.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let done = converted + skipped + failed;

        let mut state = ProgressState {
            total_files: self.total_files,
            converted_files: converted,
            skipped_files: skipped,
            failed_files: failed,
            elapsed_time: elapsed,
            estimated_remaining: None,
            files_per_second: 0.0,
            completion_percentage: 0.0,
        };

        if self.total_files > 0 {
            state.completion_percentage = (done as f64 / self.total_files as f64) * 100.0;
        }

        if elapsed.as_secs_f64() > 0.0 {
            state.files_per_second = done as f64 / elapsed.as_secs_f64();

            if done > 0 && self.total_files > done {
                let remaining_files = self.total_files - done;
                let avg_time_per_file = elapsed.as_secs_f64() / done as f64;
                state.estimated_remaining =
                    Some(Duration::from_secs_f64(remaining_files as f64 * avg_time_per_file));
            }
        }

        state
    }
}

impl ProgressState {
    /// Files finished so far, whatever their outcome
    pub fn processed(&self) -> usize {
        self.converted_files + self.skipped_files + self.failed_files
    }
}

/// Receives completion events from a batch run, in completion order.
///
/// All callbacks run on the thread that called
/// [`BatchConverter::run`](super::BatchConverter::run).
pub trait ProgressObserver {
    /// Called once the file set is known and before any conversion starts
    fn on_start(&mut self, _total_files: usize) {}

    /// Called once per source file that a worker actually processed
    fn on_file_complete(
        &mut self,
        _file: &SourceFile,
        _outcome: &ConversionOutcome,
        _state: &ProgressState,
    ) {
    }

    /// Called once at the end of every run, including empty ones
    fn on_finish(&mut self, _summary: &Summary) {}
}

/// Observer that reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressObserver for SilentProgress {}

/// Progress bar on stderr, with optional per-file lines
pub struct ConsoleProgress {
    bar: ProgressBar,
    show_details: bool,
}

impl ConsoleProgress {
    /// Create a console reporter; `show_details` prints one line per file
    pub fn new(show_details: bool) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(bar_style());
        Self { bar, show_details }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, {eta})",
        )
        .unwrap_or_else(|e| {
            debug!("Falling back to default progress style: {}", e);
            ProgressStyle::default_bar()
        })
        .progress_chars("#>-")
}

impl ProgressObserver for ConsoleProgress {
    fn on_start(&mut self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_elapsed();
    }

    fn on_file_complete(
        &mut self,
        file: &SourceFile,
        outcome: &ConversionOutcome,
        state: &ProgressState,
    ) {
        debug!(
            "{:.1}% done, {:.1} files/s, eta {:?}",
            state.completion_percentage, state.files_per_second, state.estimated_remaining
        );
        if self.show_details {
            match outcome {
                ConversionOutcome::Converted { formats, .. } => {
                    let names: Vec<String> = formats.iter().map(ToString::to_string).collect();
                    self.bar
                        .println(format!("✓ {} ({})", file.relative().display(), names.join(", ")));
                }
                ConversionOutcome::SkippedAllPresent => {
                    self.bar
                        .println(format!("- {} (already converted)", file.relative().display()));
                }
                ConversionOutcome::Failed { error, .. } => {
                    self.bar.println(format!(
                        "✗ {}: {}",
                        file.relative().display(),
                        error.user_message()
                    ));
                }
            }
        }
        self.bar.inc(1);
    }

    fn on_finish(&mut self, _summary: &Summary) {
        self.bar.finish_and_clear();
    }
}
