//! The syncherd daemon.
//!
//! [`Orchestrator`] ties the pieces together: it loads the desired state,
//! bootstraps the engine, runs reconciliation and hands over to the
//! completion monitor. [`build_router`] exposes it over HTTP.

mod config;
mod error;
mod http;
mod service;

pub use config::{EngineDatabase, ServiceConfig};
pub use error::{ServiceError, ServiceResult};
pub use http::build_router;
pub use service::Orchestrator;
