//! Per-file conversion: load, scale, encode, write

use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use tracing::{debug, info};

use crate::config::{JobSpec, TargetFormat};
use crate::discovery::SourceFile;
use crate::error::{ConvertError, ErrorContext, Result};

pub mod formats;
pub mod scale;
pub mod skip;

pub use formats::*;
pub use scale::*;
pub use skip::*;

/// Sources larger than this are memory-mapped instead of read into memory
pub const MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Result of converting one source file
#[derive(Debug)]
pub enum ConversionOutcome {
    /// At least one format was encoded
    Converted {
        formats: Vec<TargetFormat>,
        bytes_written: u64,
    },
    /// Every requested output was already on disk
    SkippedAllPresent,
    /// A step failed; no further formats were attempted. `written` lists
    /// the formats completed before the failure, which stay on disk.
    Failed {
        error: ConvertError,
        written: Vec<TargetFormat>,
        bytes_written: u64,
    },
}

/// Coarse classification of an outcome, used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Converted,
    Skipped,
    Failed,
}

impl ConversionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Converted { .. } => OutcomeKind::Converted,
            Self::SkippedAllPresent => OutcomeKind::Skipped,
            Self::Failed { .. } => OutcomeKind::Failed,
        }
    }

    /// Number of output files this conversion produced
    pub fn files_written(&self) -> usize {
        match self {
            Self::Converted { formats, .. } => formats.len(),
            Self::Failed { written, .. } => written.len(),
            Self::SkippedAllPresent => 0,
        }
    }

    /// Bytes of output this conversion left on disk
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::Converted { bytes_written, .. } | Self::Failed { bytes_written, .. } => {
                *bytes_written
            }
            Self::SkippedAllPresent => 0,
        }
    }

    /// Failure before anything was written
    pub fn failed(error: ConvertError) -> Self {
        Self::Failed {
            error,
            written: Vec::new(),
            bytes_written: 0,
        }
    }
}

/// Converts single source files according to a job
#[derive(Debug, Clone)]
pub struct ConversionWorker {
    job: Arc<JobSpec>,
    output_root: PathBuf,
    scaler: ImageScaler,
}

impl ConversionWorker {
    /// Create a worker writing below `output_root`
    pub fn new(job: Arc<JobSpec>, output_root: PathBuf) -> Self {
        let scaler = ImageScaler::new(job.filter());
        Self {
            job,
            output_root,
            scaler,
        }
    }

    /// Convert one file. Never panics on bad input and never returns an
    /// error directly: every failure becomes [`ConversionOutcome::Failed`].
    pub fn convert(&self, source: &SourceFile) -> ConversionOutcome {
        let start = Instant::now();

        let outcome = self
            .try_convert(source)
            .unwrap_or_else(ConversionOutcome::failed);
        if let ConversionOutcome::Failed { error, .. } = &outcome {
            info!("Failed to convert {:?}: {}", source.path(), error);
        }

        debug!(
            "{:?}: {:?} in {:?}",
            source.relative(),
            outcome.kind(),
            start.elapsed()
        );
        outcome
    }

    fn try_convert(&self, source: &SourceFile) -> Result<ConversionOutcome> {
        // checked first so skip planning never credits another file's outputs
        if let Some(owner) = source.collides_with() {
            return Err(ConvertError::output_collision(
                source.path().to_path_buf(),
                owner.to_path_buf(),
            ));
        }

        let target_file = source.target_file(&self.output_root);
        let formats = plan_formats(&target_file, self.job.formats(), self.job.mode());

        // The source is not even opened when everything is present
        if formats.is_empty() {
            return Ok(ConversionOutcome::SkippedAllPresent);
        }

        let image = load_image(source.path())?;
        let image = self
            .scaler
            .scale(image, self.job.scale())
            .with_file_context(source.path().to_path_buf())?;

        if let Some(parent) = target_file.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConvertError::write(parent.to_path_buf(), e.to_string()))?;
        }

        let mut written = Vec::with_capacity(formats.len());
        let mut bytes_written = 0;
        for &format in &formats {
            let destination = source.output_path(&self.output_root, format);
            match write_atomically(&image, &destination, format, self.job.jpeg_quality()) {
                Ok(bytes) => {
                    bytes_written += bytes;
                    written.push(format);
                }
                Err(error) => {
                    return Ok(ConversionOutcome::Failed {
                        error,
                        written,
                        bytes_written,
                    })
                }
            }
        }

        Ok(ConversionOutcome::Converted {
            formats,
            bytes_written,
        })
    }
}

/// Decode a source image, sniffing the format from its content
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let file = File::open(path).with_file_context(path.to_path_buf())?;
    let size = file
        .metadata()
        .with_file_context(path.to_path_buf())?
        .len();

    if size > MMAP_THRESHOLD {
        debug!("Using memory mapping for large file: {:?}", path);
        // SAFETY: the map is read-only and dropped before this function
        // returns; sources are not modified while a batch is running.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.with_file_context(path.to_path_buf())?;
        decode(&mmap, path)
    } else {
        let data = fs::read(path).with_file_context(path.to_path_buf())?;
        decode(&data, path)
    }
}

fn decode(data: &[u8], path: &Path) -> Result<DynamicImage> {
    let mut reader = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .with_file_context(path.to_path_buf())?;
    reader.no_limits();

    if reader.format().is_none() {
        return Err(ConvertError::decode(
            path.to_path_buf(),
            "unrecognised image data",
        ));
    }

    reader.decode().with_file_context(path.to_path_buf())
}

/// Throughput in files per second
pub fn files_per_second(files: usize, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    files as f64 / elapsed.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResumeMode, ScaleSpec};
    use image::{GenericImageView, ImageBuffer, Rgb};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let input = root.join("in");
        let output = root.join("out");
        fs::create_dir_all(input.join("sub")).unwrap();
        fs::create_dir_all(&output).unwrap();
        Fixture {
            _dir: dir,
            input,
            output,
        }
    }

    fn write_tiff(path: &Path, width: u32, height: u32) {
        let image: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 64]));
        image.save_with_format(path, image::ImageFormat::Tiff).unwrap();
    }

    fn worker(fx: &Fixture, builder: crate::config::JobSpecBuilder) -> ConversionWorker {
        let job = builder.build().unwrap();
        ConversionWorker::new(Arc::new(job), fx.output.clone())
    }

    #[test]
    fn test_converts_to_every_format() {
        let fx = fixture();
        let path = fx.input.join("sub").join("scan.tif");
        write_tiff(&path, 40, 20);
        let source = SourceFile::new(&fx.input, path).unwrap();

        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input).formats([TargetFormat::Png, TargetFormat::Jpeg]),
        );

        let outcome = worker.convert(&source);
        assert_eq!(outcome.kind(), OutcomeKind::Converted);
        assert_eq!(outcome.files_written(), 2);

        let png = image::open(fx.output.join("sub").join("scan.png")).unwrap();
        assert_eq!(png.dimensions(), (40, 20));
        assert!(fx.output.join("sub").join("scan.jpeg").is_file());
    }

    #[test]
    fn test_scaling_applies_before_encoding() {
        let fx = fixture();
        let path = fx.input.join("wide.tif");
        write_tiff(&path, 400, 100);
        let source = SourceFile::new(&fx.input, path).unwrap();

        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input).scale(ScaleSpec::Absolute(200)),
        );
        assert_eq!(worker.convert(&source).kind(), OutcomeKind::Converted);

        let png = image::open(fx.output.join("wide.png")).unwrap();
        assert_eq!(png.dimensions(), (200, 50));
    }

    #[test]
    fn test_degenerate_scale_fails_the_file() {
        let fx = fixture();
        let path = fx.input.join("tiny.tif");
        write_tiff(&path, 3, 2);
        let source = SourceFile::new(&fx.input, path.clone()).unwrap();

        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input).scale(ScaleSpec::Relative(0.1)),
        );

        match worker.convert(&source) {
            ConversionOutcome::Failed { error, .. } => {
                assert!(matches!(error, ConvertError::InvalidScale { .. }));
                assert_eq!(error.file_path(), Some(&path));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!fx.output.join("tiny.png").exists());
    }

    #[test]
    fn test_undecodable_source_fails() {
        let fx = fixture();
        let path = fx.input.join("broken.tif");
        fs::write(&path, b"this is not a tiff").unwrap();
        let source = SourceFile::new(&fx.input, path).unwrap();

        let outcome = worker(&fx, JobSpec::builder(&fx.input)).convert(&source);
        match outcome {
            ConversionOutcome::Failed { error, .. } => {
                assert!(matches!(error, ConvertError::DecodeError { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_existing_does_not_open_source() {
        let fx = fixture();
        // undecodable, so any attempt to load it would fail
        let path = fx.input.join("done.tif");
        fs::write(&path, b"garbage").unwrap();
        fs::write(fx.output.join("done.png"), b"previous run").unwrap();
        let source = SourceFile::new(&fx.input, path).unwrap();

        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input).mode(ResumeMode::SkipExisting),
        );
        assert_eq!(worker.convert(&source).kind(), OutcomeKind::Skipped);
        assert_eq!(fs::read(fx.output.join("done.png")).unwrap(), b"previous run");
    }

    #[test]
    fn test_skip_existing_fills_in_missing_formats() {
        let fx = fixture();
        let path = fx.input.join("half.tif");
        write_tiff(&path, 16, 16);
        fs::write(fx.output.join("half.png"), b"previous run").unwrap();
        let source = SourceFile::new(&fx.input, path).unwrap();

        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input)
                .mode(ResumeMode::SkipExisting)
                .formats([TargetFormat::Png, TargetFormat::Jpeg]),
        );

        match worker.convert(&source) {
            ConversionOutcome::Converted { formats, .. } => {
                assert_eq!(formats, vec![TargetFormat::Jpeg])
            }
            other => panic!("expected conversion, got {:?}", other),
        }
        assert_eq!(fs::read(fx.output.join("half.png")).unwrap(), b"previous run");
    }

    #[test]
    fn test_later_format_failure_keeps_earlier_counts() {
        let fx = fixture();
        let path = fx.input.join("scan.tif");
        write_tiff(&path, 12, 12);
        // a directory where the JPEG should go makes the final rename fail
        fs::create_dir_all(fx.output.join("scan.jpeg").join("blocker")).unwrap();
        let source = SourceFile::new(&fx.input, path).unwrap();

        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input)
                .mode(ResumeMode::Overwrite)
                .formats([TargetFormat::Png, TargetFormat::Jpeg]),
        );

        let outcome = worker.convert(&source);
        assert_eq!(outcome.kind(), OutcomeKind::Failed);
        assert_eq!(outcome.files_written(), 1);
        let png_len = fs::metadata(fx.output.join("scan.png")).unwrap().len();
        assert_eq!(outcome.bytes_written(), png_len);
        match outcome {
            ConversionOutcome::Failed { error, written, .. } => {
                assert_eq!(written, vec![TargetFormat::Png]);
                assert!(matches!(error, ConvertError::WriteError { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_colliding_source_fails_without_writing() {
        let fx = fixture();
        write_tiff(&fx.input.join("scan.tif"), 10, 10);
        write_tiff(&fx.input.join("scan.tiff"), 20, 30);
        fs::write(fx.output.join("scan.png"), b"owned by scan.tif").unwrap();

        let files = crate::discovery::FileDiscoverer::new(vec!["tif".into(), "tiff".into()], false)
            .discover(&fx.input)
            .unwrap();
        let second = files
            .iter()
            .find(|f| f.relative() == Path::new("scan.tiff"))
            .unwrap();

        // skip-existing must not count the other file's output as this one's
        let worker = worker(
            &fx,
            JobSpec::builder(&fx.input).mode(ResumeMode::SkipExisting),
        );
        match worker.convert(second) {
            ConversionOutcome::Failed { error, written, .. } => {
                assert!(matches!(error, ConvertError::OutputCollision { .. }));
                assert!(written.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(fs::read(fx.output.join("scan.png")).unwrap(), b"owned by scan.tif");
    }

    #[test]
    fn test_files_per_second() {
        assert_eq!(files_per_second(10, Duration::ZERO), 0.0);
        assert!((files_per_second(10, Duration::from_secs(2)) - 5.0).abs() < f64::EPSILON);
    }
}
