//! Unified error types for vigil

use thiserror::Error;

/// Unified error type for all vigil operations
#[derive(Error, Debug)]
pub enum VigilError {
    // Sampling errors
    #[error("Metrics provider error: {0}")]
    Provider(String),

    #[error("Sampling failed: {0}")]
    Sampling(String),

    // Transport errors
    #[error("Can not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No valid sentinel configuration")]
    NoActiveJobs,

    // Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Shutdown listener '{name}' failed: {reason}")]
    Listener { name: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl VigilError {
    /// Whether this error means the destination could not be reached at all.
    ///
    /// Connectivity problems are expected while a backend is down and are
    /// reported at a lower severity than protocol or encoding failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, VigilError::Connect { .. } | VigilError::Io(_))
    }
}

/// Result type alias using VigilError
pub type Result<T> = std::result::Result<T, VigilError>;
