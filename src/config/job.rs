//! Validated, immutable description of one conversion run

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{
    default_source_extensions, ResizeFilter, ResumeMode, ScaleSpec, TargetFormat,
    DEFAULT_JPEG_QUALITY,
};
use crate::error::{ConvertError, Result};

/// Everything a batch run needs, validated once and never mutated afterwards.
///
/// Obtain one through [`JobSpec::builder`]. Workers receive it behind an `Arc`
/// and only ever read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    input: PathBuf,
    output: Option<PathBuf>,
    recursive: bool,
    mode: ResumeMode,
    formats: Vec<TargetFormat>,
    scale: Option<ScaleSpec>,
    pool_size: usize,
    verbosity: i8,
    source_extensions: Vec<String>,
    jpeg_quality: u8,
    filter: ResizeFilter,
}

impl JobSpec {
    /// Start building a job for the given input root
    pub fn builder<P: Into<PathBuf>>(input: P) -> JobSpecBuilder {
        JobSpecBuilder::new(input)
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    /// User-supplied output root, if any
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn mode(&self) -> ResumeMode {
        self.mode
    }

    /// Requested formats, deduplicated, in request order
    pub fn formats(&self) -> &[TargetFormat] {
        &self.formats
    }

    pub fn scale(&self) -> Option<ScaleSpec> {
        self.scale
    }

    /// Worker count, already clamped to the available parallelism
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Verbosity level; negative means silent
    pub fn verbosity(&self) -> i8 {
        self.verbosity
    }

    pub fn is_silent(&self) -> bool {
        self.verbosity < 0
    }

    /// Lower-cased source extensions without leading dots
    pub fn source_extensions(&self) -> &[String] {
        &self.source_extensions
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    pub fn filter(&self) -> ResizeFilter {
        self.filter
    }
}

/// Builder for [`JobSpec`]; all validation happens in [`JobSpecBuilder::build`]
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    input: PathBuf,
    output: Option<PathBuf>,
    recursive: bool,
    mode: ResumeMode,
    formats: Vec<TargetFormat>,
    scale: Option<ScaleSpec>,
    pool_size: Option<usize>,
    verbosity: i8,
    source_extensions: Vec<String>,
    jpeg_quality: u8,
    filter: ResizeFilter,
}

impl JobSpecBuilder {
    fn new<P: Into<PathBuf>>(input: P) -> Self {
        Self {
            input: input.into(),
            output: None,
            recursive: false,
            mode: ResumeMode::default(),
            formats: vec![TargetFormat::Png],
            scale: None,
            pool_size: None,
            verbosity: 0,
            source_extensions: default_source_extensions(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            filter: ResizeFilter::default(),
        }
    }

    pub fn output<P: Into<PathBuf>>(mut self, output: P) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn mode(mut self, mode: ResumeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn formats<I: IntoIterator<Item = TargetFormat>>(mut self, formats: I) -> Self {
        self.formats = formats.into_iter().collect();
        self
    }

    pub fn scale(mut self, scale: ScaleSpec) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn no_scale(mut self) -> Self {
        self.scale = None;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn verbosity(mut self, verbosity: i8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn source_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Validate every field and produce the immutable job
    pub fn build(self) -> Result<JobSpec> {
        let mut formats = Vec::with_capacity(self.formats.len());
        for format in self.formats {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        if formats.is_empty() {
            return Err(ConvertError::config("At least one target format is required"));
        }

        if let Some(scale) = &self.scale {
            scale.validate()?;
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConvertError::config(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }

        if self.verbosity < -1 {
            return Err(ConvertError::config(format!(
                "Verbosity must be at least -1, got {}",
                self.verbosity
            )));
        }

        let mut source_extensions: Vec<String> = Vec::new();
        for ext in self.source_extensions {
            let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !source_extensions.contains(&ext) {
                source_extensions.push(ext);
            }
        }
        if source_extensions.is_empty() {
            return Err(ConvertError::config("At least one source extension is required"));
        }

        let available = num_cpus::get().max(1);
        let pool_size = match self.pool_size {
            Some(0) => {
                return Err(ConvertError::config("Pool size must be greater than 0"));
            }
            Some(requested) => {
                let clamped = requested.min(available);
                if clamped != requested {
                    debug!(
                        "Pool size {} exceeds available parallelism, using {}",
                        requested, clamped
                    );
                }
                clamped
            }
            None => available,
        };

        Ok(JobSpec {
            input: self.input,
            output: self.output,
            recursive: self.recursive,
            mode: self.mode,
            formats,
            scale: self.scale,
            pool_size,
            verbosity: self.verbosity,
            source_extensions,
            jpeg_quality: self.jpeg_quality,
            filter: self.filter,
        })
    }
}
