//! Desired-state validation.

use crate::error::ValidationError;
use crate::model::{ConflictStrategy, DesiredState, SyncSpec};
use std::collections::HashSet;

/// Checks a desired-state document for internal consistency.
///
/// Every check runs independently and all problems are returned in document
/// order. An empty result means the document may be reconciled.
pub fn validate(state: &DesiredState) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut db_ids = HashSet::new();
    let mut sync_names = HashSet::new();

    for db in &state.databases {
        if !db_ids.insert(db.id) {
            errors.push(ValidationError::DuplicateDatabaseId(db.id));
        }
    }

    for (index, sync) in state.syncs.iter().enumerate() {
        if sync.name.is_empty() {
            errors.push(ValidationError::MissingSyncName { index });
            continue;
        }
        if !sync_names.insert(sync.name.as_str()) {
            errors.push(ValidationError::DuplicateSyncName(sync.name.clone()));
        }

        if sync.is_bidirectional() {
            check_bidirectional(sync, &db_ids, &mut errors);
        } else {
            check_source_target(sync, &mut errors);
        }
        check_table_selection(sync, &mut errors);
        check_conflict_strategy(sync, &mut errors);
    }

    errors
}

fn check_bidirectional(sync: &SyncSpec, db_ids: &HashSet<i64>, errors: &mut Vec<ValidationError>) {
    let name = &sync.name;
    if !sync.sources.is_empty() || !sync.targets.is_empty() {
        errors.push(ValidationError::ConflictingMembership { sync: name.clone() });
    }
    if sync.bidirectional.len() < 2 {
        errors.push(ValidationError::TooFewParticipants {
            sync: name.clone(),
            count: sync.bidirectional.len(),
        });
    }
    for &db_id in &sync.bidirectional {
        if !db_ids.contains(&db_id) {
            errors.push(ValidationError::UnknownParticipant {
                sync: name.clone(),
                db_id,
            });
        }
    }
    if let Some(strategy) = sync.conflict().filter(|s| s.is_static_priority()) {
        errors.push(ValidationError::StaticConflictStrategy {
            sync: name.clone(),
            strategy: strategy.to_string(),
        });
    }
}

fn check_source_target(sync: &SyncSpec, errors: &mut Vec<ValidationError>) {
    if sync.sources.is_empty() {
        errors.push(ValidationError::MissingSources {
            sync: sync.name.clone(),
        });
    }
    if sync.targets.is_empty() {
        errors.push(ValidationError::MissingTargets {
            sync: sync.name.clone(),
        });
    }
}

fn check_table_selection(sync: &SyncSpec, errors: &mut Vec<ValidationError>) {
    match (sync.herd(), sync.tables()) {
        (None, None) => errors.push(ValidationError::MissingTableSelection {
            sync: sync.name.clone(),
        }),
        (Some(_), Some(_)) => errors.push(ValidationError::ConflictingTableSelection {
            sync: sync.name.clone(),
        }),
        _ => {}
    }
}

fn check_conflict_strategy(sync: &SyncSpec, errors: &mut Vec<ValidationError>) {
    if let Some(raw) = sync.conflict_strategy_name() {
        if raw.parse::<ConflictStrategy>().is_err() {
            errors.push(ValidationError::InvalidConflictStrategy {
                sync: sync.name.clone(),
                strategy: raw.to_string(),
                allowed: ConflictStrategy::allowed_names(),
            });
        }
    }
}
