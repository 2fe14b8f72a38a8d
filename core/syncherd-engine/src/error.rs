//! Error types for engine operations.

use crate::adapter::EntityKind;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A command ran but reported failure. `command` is already redacted.
    #[error("command `{command}` failed (exit code {code:?}): {output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    /// The process could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error (pid file, credentials file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A built-in output pattern failed to compile.
    #[error("invalid output pattern: {0}")]
    Pattern(#[from] regex_lite::Error),

    /// The engine did not reach the expected state within the bounded wait.
    #[error("engine did not become {state} within {waited:?}")]
    Timeout {
        state: &'static str,
        waited: Duration,
    },

    /// The operation was abandoned because cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,

    /// The adapter has no way to perform this operation for the entity kind.
    #[error("{operation} is not supported for {kind}")]
    Unsupported {
        operation: &'static str,
        kind: EntityKind,
    },
}

impl EngineError {
    /// Returns true if the error came from cancellation rather than the engine.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}
