//! Error types for desired-state storage.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while loading or saving the document.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document exists yet.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The document exists but is not valid JSON for the model.
    #[error("malformed configuration in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The document could not be encoded.
    #[error("failed to encode configuration: {0}")]
    Encode(#[source] serde_json::Error),

    /// I/O error reading or writing the document.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
