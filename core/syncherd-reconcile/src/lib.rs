//! Reconciliation controller.
//!
//! Converges the engine's entity set to a [`DesiredState`] in three ordered
//! steps:
//!
//! 1. **Databases**: create missing ones, update existing ones, then prune
//!    databases the document no longer declares.
//! 2. **Syncs**: create missing syncs, destructively recreate syncs whose
//!    tables or membership group changed, update the rest in place.
//! 3. **Orphan syncs**: delete syncs (and their groups) the document no
//!    longer declares.
//!
//! Failures on declared entities abort the cycle. Failures while pruning are
//! logged, recorded in the [`ReconcileReport`] and do not abort it.
//!
//! [`DesiredState`]: syncherd_types::DesiredState

mod controller;
mod deletion;
mod error;
mod report;

pub use controller::{PasswordLookup, Reconciler};
pub use deletion::{DeletionPath, DeletionStrategy};
pub use error::{ReconcileError, ReconcileResult};
pub use report::{PruneFailure, ReconcileReport, RecreateReason};
