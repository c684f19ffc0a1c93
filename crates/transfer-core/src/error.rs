//! Error types for the transfer-learning classification workspace.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A specific file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image bytes are not a supported or valid image
    #[error("Image decode error: {0}")]
    Decode(String),

    /// Malformed manifest line
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Frozen network weights missing or corrupt
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Input tensor does not match the network input shape
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Label was not part of the fit-time vocabulary
    #[error("Unknown label: {0:?}")]
    UnknownLabel(String),

    /// Key outside of the fit-time vocabulary
    #[error("Unknown label key: {0}")]
    UnknownKey(usize),

    /// Feature width differs from the width seen at fit time
    #[error("Schema mismatch: expected feature width {expected}, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// Pipeline stage wiring error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Model inference error
    #[error("Model error: {0}")]
    Model(String),

    /// Classifier training error
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Builds a [`Error::Read`] for the given path.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Read {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`Error::Parse`] for a 1-based line number.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    /// True for failures caused by the file system.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Read { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Specialized Result type for classification operations.
pub type Result<T> = std::result::Result<T, Error>;
