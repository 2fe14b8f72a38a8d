//! Log distribution and run-once completion monitoring.
//!
//! - [`LogTailer`] follows the engine's log file with `tail -F` semantics and
//!   feeds lines into a single-consumer channel.
//! - [`LogHub`] fans [`LogRecord`]s out to any number of subscribers without
//!   ever blocking the publisher; [`HubLayer`] publishes every `tracing` event.
//! - [`CompletionMonitor`] watches the line stream for run-once completion
//!   markers, stops finished syncs and decides whether the process ends or
//!   keeps supervising the engine.

mod error;
mod hub;
mod layer;
mod monitor;
mod record;
mod tail;

pub use error::{MonitorError, MonitorResult};
pub use hub::{LogHub, LogPublisher, Subscription};
pub use layer::HubLayer;
pub use monitor::{CompletionMonitor, CompletionTracker, MonitorConfig, MonitorOutcome};
pub use record::{ENGINE_LOG_COMPONENT, LogRecord};
pub use tail::{LogTailer, TailConfig};
