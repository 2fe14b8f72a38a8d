//! Replication engine boundary for syncherd.
//!
//! The engine exposes its state only through a text-based command protocol.
//! This crate hides that protocol behind [`EngineAdapter`], a structured
//! capability set the reconciler and the monitor depend on:
//!
//! - [`adapter`]: the trait plus entity kinds, attribute lists and descriptors
//! - [`bucardo`]: the production adapter driving the `bucardo` CLI
//! - [`runner`]: process execution with cancellation and redacted logging
//! - [`credentials`]: `.pgpass` provisioning for the engine's connections
//! - `mock` (feature `mock`): an in-memory engine that records every call,
//!   for tests

pub mod adapter;
pub mod bucardo;
pub mod credentials;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod runner;

pub use adapter::{Attributes, ConnectionParams, EngineAdapter, EntityKind, SyncDescriptor};
pub use bucardo::{BucardoCli, CliConfig};
pub use credentials::{CredentialStore, PgpassEntry, PgpassFile};
pub use error::{EngineError, EngineResult};
#[cfg(any(test, feature = "mock"))]
pub use mock::{EngineCall, EngineOp, MockEngine};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
