//! Error types for the desired-state model.

use thiserror::Error;

/// A single consistency problem found in a desired-state document.
///
/// Validation never stops at the first problem; callers receive the whole
/// batch and must refuse to reconcile while it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two databases share the same numeric id.
    #[error("database ID {0} is duplicated")]
    DuplicateDatabaseId(i64),

    /// A sync has an empty name; no further checks are made on it.
    #[error("sync at position {index} is missing the required 'name' property")]
    MissingSyncName { index: usize },

    /// Two syncs share the same name.
    #[error("sync name '{0}' is duplicated")]
    DuplicateSyncName(String),

    /// Bidirectional membership needs at least two participants.
    #[error("sync '{sync}': 'bidirectional' requires at least two database IDs, got {count}")]
    TooFewParticipants { sync: String, count: usize },

    /// A bidirectional participant is not declared in `databases`.
    #[error("sync '{sync}': 'bidirectional' database ID {db_id} is not defined in the 'databases' list")]
    UnknownParticipant { sync: String, db_id: i64 },

    /// A source/target-only conflict strategy was combined with bidirectional membership.
    #[error("sync '{sync}': invalid conflict_strategy '{strategy}' for a bidirectional sync, use 'bucardo_latest' instead")]
    StaticConflictStrategy { sync: String, strategy: String },

    /// Both membership shapes were populated.
    #[error("sync '{sync}': 'bidirectional' cannot be combined with 'sources'/'targets'")]
    ConflictingMembership { sync: String },

    /// A source/target sync without sources.
    #[error("sync '{sync}': must have at least one source")]
    MissingSources { sync: String },

    /// A source/target sync without targets.
    #[error("sync '{sync}': must have at least one target")]
    MissingTargets { sync: String },

    /// Neither a herd nor an explicit table list was given.
    #[error("sync '{sync}': must define either 'herd' or 'tables'")]
    MissingTableSelection { sync: String },

    /// Both a herd and an explicit table list were given.
    #[error("sync '{sync}': 'herd' and 'tables' are mutually exclusive")]
    ConflictingTableSelection { sync: String },

    /// The conflict strategy is not one of the supported values.
    #[error("sync '{sync}': invalid conflict_strategy '{strategy}', must be one of: {allowed}")]
    InvalidConflictStrategy {
        sync: String,
        strategy: String,
        allowed: String,
    },
}

impl ValidationError {
    /// Name of the sync the error refers to, if any.
    pub fn sync_name(&self) -> Option<&str> {
        match self {
            ValidationError::DuplicateDatabaseId(_) | ValidationError::MissingSyncName { .. } => {
                None
            }
            ValidationError::DuplicateSyncName(sync)
            | ValidationError::TooFewParticipants { sync, .. }
            | ValidationError::UnknownParticipant { sync, .. }
            | ValidationError::StaticConflictStrategy { sync, .. }
            | ValidationError::ConflictingMembership { sync }
            | ValidationError::MissingSources { sync }
            | ValidationError::MissingTargets { sync }
            | ValidationError::MissingTableSelection { sync }
            | ValidationError::ConflictingTableSelection { sync }
            | ValidationError::InvalidConflictStrategy { sync, .. } => Some(sync),
        }
    }
}

/// Failure to resolve a database password.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The password is delegated to an environment variable that is unset or empty.
    #[error("environment variable {var} not set for db id {db_id}")]
    MissingEnv { var: String, db_id: i64 },
}
