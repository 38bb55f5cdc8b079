//! Batch orchestration over a bounded worker pool

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{JobSpec, TargetFormat};
use crate::discovery::{FileDiscoverer, ResolvedPaths, SourceFile};
use crate::error::{ConvertError, Result};
use crate::processing::{files_per_second, plan_formats, ConversionOutcome, ConversionWorker};

pub mod progress;

pub use progress::*;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every discovered file was processed
    Completed,
    /// Discovery found no source files
    NothingToConvert,
    /// A stop was requested; some files were never started
    Interrupted,
}

/// A file that failed, with a printable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregated result of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub status: RunStatus,
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub files_written: usize,
    pub bytes_written: u64,
    pub duration_secs: f64,
    pub failures: Vec<FailureRecord>,
}

impl Summary {
    fn new(paths: &ResolvedPaths, total: usize) -> Self {
        Self {
            status: RunStatus::Completed,
            input_root: paths.input_root.clone(),
            output_root: paths.output_root.clone(),
            total,
            converted: 0,
            skipped: 0,
            failed: 0,
            cancelled: 0,
            files_written: 0,
            bytes_written: 0,
            duration_secs: 0.0,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, file: &SourceFile, outcome: &ConversionOutcome) {
        // counts partial output of failed files too
        self.files_written += outcome.files_written();
        self.bytes_written += outcome.bytes_written();

        match outcome {
            ConversionOutcome::Converted { .. } => self.converted += 1,
            ConversionOutcome::SkippedAllPresent => self.skipped += 1,
            ConversionOutcome::Failed { error, .. } => {
                self.failed += 1;
                self.failures.push(FailureRecord {
                    path: file.path().to_path_buf(),
                    reason: error.user_message(),
                });
            }
        }
    }

    /// No failures and nothing left undone
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Average throughput over the whole run
    pub fn files_per_second(&self) -> f64 {
        files_per_second(
            self.converted + self.skipped + self.failed,
            std::time::Duration::from_secs_f64(self.duration_secs),
        )
    }
}

/// Resolved roots and discovered files, computed without writing anything
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub paths: ResolvedPaths,
    pub files: Vec<SourceFile>,
}

impl BatchPlan {
    /// Formats each file would be encoded to under `job`'s resume mode.
    /// Files that collide with an earlier source get none.
    pub fn pending<'a>(
        &'a self,
        job: &'a JobSpec,
    ) -> impl Iterator<Item = (&'a SourceFile, Vec<TargetFormat>)> + 'a {
        self.files.iter().map(move |file| {
            if file.collides_with().is_some() {
                return (file, Vec::new());
            }
            let target = file.target_file(&self.paths.output_root);
            (file, plan_formats(&target, job.formats(), job.mode()))
        })
    }
}

enum WorkerMessage {
    Finished(SourceFile, ConversionOutcome),
    NotStarted(SourceFile),
}

/// Runs a job: resolves paths, discovers files and converts them in parallel
#[derive(Debug, Default)]
pub struct BatchConverter {
    stop: Arc<AtomicBool>,
}

impl BatchConverter {
    /// Create a converter
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that, once set, keeps workers from starting further files.
    /// Files already in progress are finished.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Resolve paths and discover source files without touching the output tree
    pub fn plan(&self, job: &JobSpec) -> Result<BatchPlan> {
        let paths = ResolvedPaths::resolve(job.input(), job.output(), job.mode())?;
        let files = FileDiscoverer::for_job(job, &paths).discover(&paths.input_root)?;
        info!("Found {} source files", files.len());
        Ok(BatchPlan { paths, files })
    }

    /// Convert every discovered file.
    ///
    /// Precondition failures are returned as errors before any file is
    /// touched; per-file failures are only counted in the [`Summary`].
    pub fn run(&self, job: JobSpec, observer: &mut dyn ProgressObserver) -> Result<Summary> {
        let start_time = Instant::now();
        let BatchPlan { paths, files } = self.plan(&job)?;
        let total = files.len();
        let mut summary = Summary::new(&paths, total);

        if files.is_empty() {
            info!("Nothing to convert under {:?}", paths.input_root);
            summary.status = RunStatus::NothingToConvert;
            summary.duration_secs = start_time.elapsed().as_secs_f64();
            observer.on_finish(&summary);
            return Ok(summary);
        }

        paths.prepare(job.mode())?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(job.pool_size())
            .thread_name(|index| format!("convert-{}", index))
            .build()
            .map_err(|e| ConvertError::parallel(format!("Failed to build worker pool: {}", e)))?;

        info!(
            "Converting {} files to {} with {} workers",
            total,
            format_list(job.formats()),
            job.pool_size()
        );
        if let Some(scale) = job.scale() {
            info!("Scaling: {}", scale);
        }

        let job = Arc::new(job);
        let worker = Arc::new(ConversionWorker::new(
            Arc::clone(&job),
            paths.output_root.clone(),
        ));
        let (sender, receiver) = channel::unbounded();

        observer.on_start(total);

        for file in files {
            let sender = sender.clone();
            let worker = Arc::clone(&worker);
            let stop = Arc::clone(&self.stop);

            pool.spawn_fifo(move || {
                let message = if stop.load(Ordering::SeqCst) {
                    WorkerMessage::NotStarted(file)
                } else {
                    let outcome = isolate_panics(|| worker.convert(&file));
                    WorkerMessage::Finished(file, outcome)
                };
                // the receiver outlives every task
                let _ = sender.send(message);
            });
        }
        // the loop below ends once every task has dropped its sender
        drop(sender);

        let tracker = ProgressTracker::new(total);
        for message in receiver {
            match message {
                WorkerMessage::Finished(file, outcome) => {
                    tracker.record(outcome.kind());
                    summary.record(&file, &outcome);
                    observer.on_file_complete(&file, &outcome, &tracker.state());
                }
                WorkerMessage::NotStarted(file) => {
                    debug!("Not started: {:?}", file.relative());
                    summary.cancelled += 1;
                }
            }
        }

        if summary.cancelled > 0 {
            warn!("Interrupted: {} files were not started", summary.cancelled);
            summary.status = RunStatus::Interrupted;
        }
        summary.failures.sort_by(|a, b| a.path.cmp(&b.path));
        summary.duration_secs = start_time.elapsed().as_secs_f64();

        info!(
            "Batch finished: {} converted, {} skipped, {} failed in {:.2}s",
            summary.converted, summary.skipped, summary.failed, summary.duration_secs
        );

        observer.on_finish(&summary);
        Ok(summary)
    }
}

fn format_list(formats: &[TargetFormat]) -> String {
    formats
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run one conversion, turning a panic into a failed outcome so the rest of
/// the batch carries on. Relies on the unwinding panic strategy.
fn isolate_panics<F>(convert: F) -> ConversionOutcome
where
    F: FnOnce() -> ConversionOutcome,
{
    panic::catch_unwind(AssertUnwindSafe(convert)).unwrap_or_else(|payload| {
        ConversionOutcome::failed(ConvertError::parallel(format!(
            "worker panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
