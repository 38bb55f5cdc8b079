//! batch-img-convert - Resumable Batch Image Converter
//!
//! Converts every TIFF image below an input directory into one or more
//! target formats, mirroring the directory structure into an output tree.
//!
//! # Features
//!
//! - **Parallel**: a bounded worker pool converts files concurrently
//! - **Resumable**: `skip-existing` mode only encodes formats not yet on disk
//! - **Crash-safe outputs**: files are written to a temporary sibling and
//!   renamed into place
//! - **Optional scaling**: relative factor or absolute longest edge
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use batch_img_convert::{BatchConverter, JobSpec, SilentProgress, TargetFormat};
//!
//! let job = JobSpec::builder("scans")
//!     .formats([TargetFormat::Png, TargetFormat::Jpeg])
//!     .pool_size(4)
//!     .build()?;
//!
//! let summary = BatchConverter::new().run(job, &mut SilentProgress)?;
//! println!("{} converted, {} failed", summary.converted, summary.failed);
//! # Ok::<(), batch_img_convert::ConvertError>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod parallel;
pub mod processing;

// Re-export commonly used types
pub use config::{Config, JobSpec, JobSpecBuilder, ResizeFilter, ResumeMode, ScaleSpec, TargetFormat};
pub use discovery::{FileDiscoverer, ResolvedPaths, SourceFile};
pub use error::{ConvertError, Result};
pub use parallel::{
    BatchConverter, BatchPlan, ConsoleProgress, ProgressObserver, RunStatus, SilentProgress,
    Summary,
};
pub use processing::{ConversionOutcome, ConversionWorker};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log level for a verbosity value: -1 errors only, 0 warnings, then info,
/// debug and trace
pub fn level_for_verbosity(verbosity: i8) -> tracing::Level {
    match verbosity {
        i8::MIN..=-1 => tracing::Level::ERROR,
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Install the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is
/// harmless; only the first subscriber is kept.
pub fn init_logging(level: tracing::Level, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        debug!("batch-img-convert v{} logging initialized", VERSION);
    }
}

/// Log host details useful when diagnosing slow or failing runs
pub fn log_system_info() {
    use sysinfo::{System, SystemExt};

    let mut system = System::new();
    system.refresh_memory();

    info!(
        "Host: {} logical CPUs, {} MB available memory",
        num_cpus::get(),
        system.available_memory() / (1024 * 1024)
    );
    debug!(
        "OS: {} {}",
        system.name().unwrap_or_else(|| "unknown".to_string()),
        system.os_version().unwrap_or_default()
    );
    debug!(
        "Decoder support: TIFF {}, PNG {}, JPEG {}",
        image::ImageFormat::Tiff.can_read(),
        image::ImageFormat::Png.can_read(),
        image::ImageFormat::Jpeg.can_read()
    );
}
