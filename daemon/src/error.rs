//! Service-level errors.

use syncherd_engine::EngineError;
use syncherd_monitor::MonitorError;
use syncherd_reconcile::ReconcileError;
use syncherd_store::StoreError;
use syncherd_types::{CredentialError, ValidationError};
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("sync not found: {0}")]
    SyncNotFound(String),

    #[error("sync already exists: {0}")]
    SyncExists(String),

    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Reconcile(ReconcileError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl From<ReconcileError> for ServiceError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Validation(errors) => ServiceError::Invalid(errors),
            ReconcileError::Credential(e) => ServiceError::Credential(e),
            other => ServiceError::Reconcile(other),
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
