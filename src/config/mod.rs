//! Configuration management for batch conversion

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

pub mod job;
pub use job::*;

/// Smallest accepted relative scale factor
pub const MIN_SCALE_FACTOR: f64 = 0.1;
/// Largest accepted relative scale factor
pub const MAX_SCALE_FACTOR: f64 = 4.0;
/// Smallest accepted absolute target for the longest edge
pub const MIN_LONGEST_EDGE: u32 = 160;
/// JPEG quality used when none is configured
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Main configuration structure, loaded from an optional TOML or YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for every conversion run
    pub conversion: ConversionDefaults,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Conversion defaults, overridable from the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionDefaults {
    /// Output root (None = `<input>/converted`)
    pub output: Option<PathBuf>,

    /// Traverse subdirectories of the input root
    pub recursive: bool,

    /// Policy for pre-existing output
    pub mode: ResumeMode,

    /// Formats every source file is converted to
    pub formats: Vec<TargetFormat>,

    /// Optional resize before encoding
    pub scale: Option<ScaleSpec>,

    /// Number of worker threads (None = one per logical CPU)
    pub pool_size: Option<usize>,

    /// File extensions treated as source images
    pub source_extensions: Vec<String>,

    /// JPEG encoder quality (1-100)
    pub jpeg_quality: u8,

    /// Resampling filter used when scaling
    pub filter: ResizeFilter,
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            output: None,
            recursive: false,
            mode: ResumeMode::default(),
            formats: vec![TargetFormat::Png],
            scale: None,
            pool_size: None,
            source_extensions: default_source_extensions(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            filter: ResizeFilter::default(),
        }
    }
}

impl ConversionDefaults {
    /// Seed a job builder for `input` with these defaults
    pub fn to_builder<P: Into<PathBuf>>(&self, input: P) -> JobSpecBuilder {
        let mut builder = JobSpec::builder(input)
            .recursive(self.recursive)
            .mode(self.mode)
            .formats(self.formats.clone())
            .source_extensions(self.source_extensions.clone())
            .jpeg_quality(self.jpeg_quality)
            .filter(self.filter);

        if let Some(output) = &self.output {
            builder = builder.output(output.clone());
        }
        if let Some(scale) = self.scale {
            builder = builder.scale(scale);
        }
        if let Some(pool_size) = self.pool_size {
            builder = builder.pool_size(pool_size);
        }
        builder
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); None = derived from verbosity
    pub level: Option<String>,

    /// Enable JSON logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            json_format: false,
        }
    }
}

/// Source extensions recognised when none are configured
pub fn default_source_extensions() -> Vec<String> {
    vec!["tif".to_string(), "tiff".to_string()]
}

/// Output formats a source file can be converted to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Bmp,
}

impl TargetFormat {
    /// All supported target formats
    pub const ALL: [TargetFormat; 3] = [TargetFormat::Png, TargetFormat::Jpeg, TargetFormat::Bmp];

    /// Canonical file extension, the lower-cased format name
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Bmp => "bmp",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => f.write_str("PNG"),
            Self::Jpeg => f.write_str("JPEG"),
            Self::Bmp => f.write_str("BMP"),
        }
    }
}

/// Policy for output that already exists
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeMode {
    /// Reuse the output tree; formats already written are not encoded again
    SkipExisting,
    /// Reuse the output tree; every format is re-encoded
    Overwrite,
    /// Refuse to run when the output root exists
    #[default]
    FailIfExists,
}

impl fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipExisting => f.write_str("skip-existing"),
            Self::Overwrite => f.write_str("overwrite"),
            Self::FailIfExists => f.write_str("fail-if-exists"),
        }
    }
}

/// How source images are scaled before encoding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ScaleSpec {
    /// Multiply both dimensions by a factor in `[0.1, 4.0]`
    Relative(f64),
    /// Set the longer edge to this many pixels (at least 160)
    Absolute(u32),
}

impl ScaleSpec {
    /// Check the value against its allowed range
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Relative(factor) => {
                if !factor.is_finite() || !(MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&factor) {
                    return Err(ConvertError::config(format!(
                        "Scale factor must be between {} and {}, got {}",
                        MIN_SCALE_FACTOR, MAX_SCALE_FACTOR, factor
                    )));
                }
            }
            Self::Absolute(pixels) => {
                if pixels < MIN_LONGEST_EDGE {
                    return Err(ConvertError::config(format!(
                        "Target size must be at least {} pixels, got {}",
                        MIN_LONGEST_EDGE, pixels
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ScaleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative(factor) => write!(f, "relative {}", factor),
            Self::Absolute(pixels) => write!(f, "absolute {}px", pixels),
        }
    }
}

/// Available resize filters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    /// Nearest neighbor (fastest, lowest quality)
    Nearest,
    /// Triangle (linear interpolation)
    Triangle,
    /// Catmull-Rom cubic spline
    CatmullRom,
    /// Gaussian blur
    Gaussian,
    /// Lanczos with radius 3 (high quality)
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for image::imageops::FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => image::imageops::FilterType::Nearest,
            ResizeFilter::Triangle => image::imageops::FilterType::Triangle,
            ResizeFilter::CatmullRom => image::imageops::FilterType::CatmullRom,
            ResizeFilter::Gaussian => image::imageops::FilterType::Gaussian,
            ResizeFilter::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ConvertError::config(format!(
                "Failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        match config_extension(path.as_ref()).as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(ConvertError::config(
                "Unsupported config file format. Use .toml or .yaml",
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = match config_extension(path.as_ref()).as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| ConvertError::config(format!("TOML serialization failed: {}", e)))?,
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map_err(|e| ConvertError::config(format!("YAML serialization failed: {}", e)))?,
            _ => {
                return Err(ConvertError::config(
                    "Unsupported config file format. Use .toml or .yaml",
                ))
            }
        };

        std::fs::write(&path, content).map_err(|e| {
            ConvertError::config(format!(
                "Failed to write config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // The builder performs every value check without touching the filesystem
        self.conversion.to_builder(".").build()?;

        if let Some(level) = &self.logging.level {
            level.parse::<tracing::Level>().map_err(|_| {
                ConvertError::config(format!("Unknown log level '{}'", level))
            })?;
        }

        Ok(())
    }
}

fn config_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}
