//! Error types for reconciliation.

use syncherd_engine::{EngineError, EntityKind};
use syncherd_types::{CredentialError, ValidationError};
use thiserror::Error;

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reasons a reconciliation cycle was refused or aborted.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The document is inconsistent; nothing was sent to the engine.
    #[error("configuration validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    /// A declared sync has no computable membership group.
    #[error("sync '{0}' has no complete membership")]
    IncompleteSync(String),

    /// An engine operation on a declared entity failed.
    #[error("{kind} '{name}': {source}")]
    Engine {
        kind: EntityKind,
        name: String,
        #[source]
        source: EngineError,
    },

    /// A database password could not be resolved.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Cancellation was requested mid-cycle.
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub(crate) fn engine(kind: EntityKind, name: &str, source: EngineError) -> Self {
        if source.is_cancelled() {
            return ReconcileError::Cancelled;
        }
        ReconcileError::Engine {
            kind,
            name: name.to_string(),
            source,
        }
    }
}
