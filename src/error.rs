//! Error types and handling for batch conversion

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Main error type for conversion operations
#[derive(Debug, Error)]
pub enum ConvertError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Errors reported by the imaging library
    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Input path missing, unreadable or not a directory
    #[error("Invalid input path {path:?}: {message}")]
    InvalidInput { path: PathBuf, message: String },

    /// Output directory exists and the resume mode forbids reusing it
    #[error("Output directory already exists: {path:?}")]
    AlreadyExists { path: PathBuf },

    /// Output root would nest the input inside itself
    #[error("Output directory {output:?} conflicts with input directory {input:?}")]
    SelfReferentialOutput { input: PathBuf, output: PathBuf },

    /// Another source in the same directory shares this file's stem, so
    /// both would write the same outputs
    #[error("{path:?} maps to the same output files as {other:?}")]
    OutputCollision { path: PathBuf, other: PathBuf },

    /// Source image could not be opened or decoded
    #[error("Failed to decode {path:?}: {message}")]
    DecodeError { path: PathBuf, message: String },

    /// Scaling would produce an empty image
    #[error("Invalid scale {spec} for {width}x{height} image (file: {file:?})")]
    InvalidScale {
        width: u32,
        height: u32,
        spec: String,
        file: Option<PathBuf>,
    },

    /// Encoding or writing an output file failed
    #[error("Failed to write {path:?}: {message}")]
    WriteError { path: PathBuf, message: String },

    /// Worker pool errors
    #[error("Parallel processing error: {message}")]
    ParallelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerdeError(String),
}

impl ConvertError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(path: PathBuf, message: S) -> Self {
        Self::InvalidInput {
            path,
            message: message.into(),
        }
    }

    /// Create a new output collision error
    pub fn output_collision(path: PathBuf, other: PathBuf) -> Self {
        Self::OutputCollision { path, other }
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(path: PathBuf, message: S) -> Self {
        Self::DecodeError {
            path,
            message: message.into(),
        }
    }

    /// Create a new invalid scale error
    pub fn invalid_scale<S: Into<String>>(
        width: u32,
        height: u32,
        spec: S,
        file: Option<PathBuf>,
    ) -> Self {
        Self::InvalidScale {
            width,
            height,
            spec: spec.into(),
            file,
        }
    }

    /// Create a new write error
    pub fn write<S: Into<String>>(path: PathBuf, message: S) -> Self {
        Self::WriteError {
            path,
            message: message.into(),
        }
    }

    /// Create a new parallel processing error
    pub fn parallel<S: Into<String>>(message: S) -> Self {
        Self::ParallelError {
            message: message.into(),
        }
    }

    /// Check if this error must abort a run before any file is touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::AlreadyExists { .. } | Self::SelfReferentialOutput { .. }
        )
    }

    /// Get the associated file path if available
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::InvalidScale { file, .. } => file.as_ref(),

            Self::InvalidInput { path, .. }
            | Self::AlreadyExists { path }
            | Self::OutputCollision { path, .. }
            | Self::DecodeError { path, .. }
            | Self::WriteError { path, .. } => Some(path),

            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::IoError(e) => format!("File system error: {}", e),
            Self::ImageError(e) => format!("Image processing failed: {}", e),
            Self::AlreadyExists { path } => format!(
                "Output directory {} already exists. Use --mode overwrite or --mode skip-existing to reuse it.",
                path.display()
            ),
            Self::OutputCollision { other, .. } => format!(
                "Not converted: {} already writes the same output files; rename one of them",
                other.display()
            ),
            Self::InvalidScale { width, height, spec, .. } => format!(
                "Scaling a {}x{} image by {} would produce an empty image",
                width, height, spec
            ),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for ConvertError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerdeError(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for ConvertError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerdeError(format!("YAML parsing error: {}", err))
    }
}

/// Error context extension for adding file path information
pub trait ErrorContext<T> {
    /// Add file context to an error
    fn with_file_context(self, file: PathBuf) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<ConvertError>,
{
    fn with_file_context(self, file: PathBuf) -> Result<T> {
        self.map_err(|e| match e.into() {
            ConvertError::InvalidScale { width, height, spec, file: None } => {
                ConvertError::InvalidScale { width, height, spec, file: Some(file) }
            }
            // Bare I/O and codec errors carry no path; wrap them so the
            // summary can point at the offending file.
            ConvertError::IoError(e) => ConvertError::decode(file, e.to_string()),
            ConvertError::ImageError(e) => ConvertError::decode(file, e.to_string()),
            other => other,
        })
    }
}
