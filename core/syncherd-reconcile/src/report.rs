//! Outcome of a reconciliation cycle.

use syncherd_engine::EntityKind;

/// Why an existing sync had to be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecreateReason {
    /// The normalized table lists differ.
    TablesChanged {
        current: Vec<String>,
        desired: Vec<String>,
    },
    /// The engine references a different membership group than expected.
    MembershipChanged { current: String, expected: String },
}

/// A pruning step that failed without aborting the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneFailure {
    pub kind: EntityKind,
    pub name: String,
    pub error: String,
}

/// What a cycle did, entity by entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub databases_created: Vec<String>,
    pub databases_updated: Vec<String>,
    pub databases_pruned: Vec<String>,
    pub syncs_created: Vec<String>,
    pub syncs_updated: Vec<String>,
    pub syncs_recreated: Vec<(String, RecreateReason)>,
    pub syncs_pruned: Vec<String>,
    pub prune_failures: Vec<PruneFailure>,
}

impl ReconcileReport {
    /// True when the cycle created or deleted nothing.
    pub fn is_structurally_unchanged(&self) -> bool {
        self.databases_created.is_empty()
            && self.databases_pruned.is_empty()
            && self.syncs_created.is_empty()
            && self.syncs_recreated.is_empty()
            && self.syncs_pruned.is_empty()
    }

    pub(crate) fn prune_failed(&mut self, kind: EntityKind, name: &str, error: impl ToString) {
        self.prune_failures.push(PruneFailure {
            kind,
            name: name.to_string(),
            error: error.to_string(),
        });
    }
}
