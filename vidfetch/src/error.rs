//! Error types for vidfetch.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for vidfetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported platform for URL: {0}")]
    UnsupportedPlatform(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The extraction worker failed. `stderr` is kept for logs only.
    #[error("Worker error: {message}")]
    Worker { message: String, stderr: String },

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Download sink closed")]
    SinkClosed,

    #[error("Download cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error during {op} at {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a worker error.
    pub fn worker(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
            stderr: stderr.into(),
        }
    }

    pub fn io_path(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether this error was rejected before any job was created.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::UnsupportedPlatform(_))
    }
}
