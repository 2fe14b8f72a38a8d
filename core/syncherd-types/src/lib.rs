//! Core types for syncherd.
//!
//! This crate holds the declarative description of a replication topology
//! (the *desired state*) together with the pure logic that operates on it:
//!
//! - **Model**: [`DesiredState`], [`DatabaseSpec`], [`SyncSpec`] as they are
//!   persisted in the JSON document
//! - **Views**: typed, mutually-exclusive shapes ([`Membership`],
//!   [`TableSelection`]) derived from the raw document fields
//! - **Membership groups**: deterministic engine-side group naming
//! - **Validation**: an accumulating consistency check that must pass before
//!   any reconciliation is attempted
//!
//! # Example
//!
//! ```
//! use syncherd_types::{validate, DesiredState};
//!
//! let state: DesiredState = serde_json::from_str(r#"{
//!     "databases": [
//!         {"id": 1, "dbname": "app", "host": "pg1", "user": "app", "pass": "secret"},
//!         {"id": 2, "dbname": "app", "host": "pg2", "user": "app", "pass": "secret"}
//!     ],
//!     "syncs": [
//!         {"name": "orders", "sources": [1], "targets": [2], "tables": "public.orders", "onetimecopy": 2}
//!     ]
//! }"#).unwrap();
//!
//! assert!(validate(&state).is_empty());
//! ```

mod error;
mod membership;
mod model;
mod validate;

pub use error::{CredentialError, ValidationError};
pub use membership::{GroupMember, MembershipGroup, Role};
pub use model::{
    ConflictStrategy, DatabaseSpec, DesiredState, FullCopy, Membership, SyncSpec, TableSelection,
    normalize_tables, ENV_PASSWORD_MARKER,
};
pub use validate::validate;
