//! Run-once completion monitoring.
//!
//! ```text
//! Watching(pending, deadline?) ──all complete──▶ Terminated   (every sync run-once)
//!        │                     └─all complete──▶ SteadyState  (long-running syncs remain)
//!        ├──deadline elapsed──▶ Terminated (failure)
//!        └──cancelled─────────▶ Terminated
//! ```
//!
//! Every observed line is republished verbatim, whatever the state.

use crate::error::{MonitorError, MonitorResult};
use crate::hub::LogPublisher;
use crate::record::{ENGINE_LOG_COMPONENT, LogRecord};
use std::collections::BTreeSet;
use std::sync::Arc;
use syncherd_engine::EngineAdapter;
use syncherd_types::DesiredState;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Engine log levels that include completion markers.
const MARKER_LOG_LEVELS: [&str; 2] = ["VERBOSE", "DEBUG"];

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Phrase the engine logs when a worker finishes normally.
    pub completion_marker: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            completion_marker: "Reason: Normal exit".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn with_completion_marker(mut self, marker: impl Into<String>) -> Self {
        self.completion_marker = marker.into();
        self
    }
}

/// How monitoring ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every sync was run-once and all completed; the engine was stopped.
    AllComplete,
    /// Run-once syncs completed, then the engine was supervised until
    /// cancellation and stopped.
    SteadyState,
    /// The deadline elapsed first; the engine was stopped.
    TimedOut { pending: Vec<String> },
    /// Cancelled while watching; the engine was stopped.
    Cancelled,
}

impl MonitorOutcome {
    /// True unless the run-once deadline was missed.
    pub fn is_success(&self) -> bool {
        !matches!(self, MonitorOutcome::TimedOut { .. })
    }
}

/// Tracks which run-once syncs are still pending.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    marker: String,
    pending: BTreeSet<String>,
}

impl CompletionTracker {
    pub fn new<I, S>(marker: impl Into<String>, syncs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            marker: marker.into(),
            pending: syncs.into_iter().map(Into::into).collect(),
        }
    }

    /// Removes and returns every pending sync whose completion `line` reports.
    pub fn observe(&mut self, line: &str) -> Vec<String> {
        if !line.contains(&self.marker) {
            return Vec::new();
        }
        let completed: Vec<String> = self
            .pending
            .iter()
            .filter(|name| line.contains(&worker_tag(name)))
            .cloned()
            .collect();
        for name in &completed {
            self.pending.remove(name);
        }
        completed
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }
}

/// How the engine names a sync's worker in its log.
fn worker_tag(sync: &str) -> String {
    format!("KID ({sync})")
}

/// Watches engine log lines and drives the engine to its terminal state.
pub struct CompletionMonitor {
    engine: Arc<dyn EngineAdapter>,
    publisher: Arc<dyn LogPublisher>,
    config: MonitorConfig,
}

impl CompletionMonitor {
    pub fn new(engine: Arc<dyn EngineAdapter>, publisher: Arc<dyn LogPublisher>) -> Self {
        Self {
            engine,
            publisher,
            config: MonitorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Watches the run-once syncs of `desired` until they all complete, the
    /// deadline elapses or `cancel` fires.
    pub async fn watch(
        &self,
        desired: &DesiredState,
        lines: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> MonitorResult<MonitorOutcome> {
        let level = desired.log_level().unwrap_or_default();
        if !MARKER_LOG_LEVELS.contains(&level) {
            warn!(
                component = "monitor",
                log_level = level,
                "Run-once syncs need log_level VERBOSE or DEBUG; completion may go unnoticed"
            );
        }

        let mut tracker = CompletionTracker::new(
            self.config.completion_marker.clone(),
            desired.run_once_syncs().map(|s| s.name.clone()),
        );
        let timeout = desired.max_run_once_timeout();
        // A deadline beyond what the clock can represent never elapses.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        info!(
            component = "monitor",
            syncs = ?tracker.pending(),
            timeout = ?timeout,
            "Monitoring syncs for completion"
        );

        while !tracker.is_done() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled().await),
                _ = sleep_until(deadline) => return Ok(self.timed_out(&tracker, timeout).await),
                line = lines.recv() => {
                    let Some(line) = line else {
                        return Err(MonitorError::StreamClosed { pending: tracker.pending() });
                    };
                    self.republish(&line);
                    for sync in tracker.observe(&line) {
                        info!(component = "monitor", sync_name = %sync, "Sync completed");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(self.cancelled().await),
                            _ = sleep_until(deadline), if !tracker.is_done() => {
                                return Ok(self.timed_out(&tracker, timeout).await);
                            }
                            result = self.engine.stop_sync(&sync) => {
                                if let Err(e) = result {
                                    warn!(component = "monitor", sync_name = %sync, error = %e, "Failed to stop completed sync");
                                }
                            }
                        }
                    }
                }
            }
        }

        if desired.all_run_once() {
            info!(component = "monitor", "All syncs were run-once, stopping engine");
            self.stop_engine().await;
            return Ok(MonitorOutcome::AllComplete);
        }
        info!(component = "monitor", "Run-once syncs done, continuing as a long-running service");
        self.supervise(lines, cancel).await;
        Ok(MonitorOutcome::SteadyState)
    }

    /// Republishes engine lines until cancelled, then stops the engine.
    pub async fn supervise(&self, lines: &mut mpsc::Receiver<String>, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.recv() => match line {
                    Some(line) => self.republish(&line),
                    None => {
                        warn!(component = "monitor", "Engine log stream ended");
                        cancel.cancelled().await;
                        break;
                    }
                },
            }
        }
        info!(component = "monitor", "Shutting down");
        self.stop_engine().await;
    }

    async fn cancelled(&self) -> MonitorOutcome {
        info!(component = "monitor", "Cancelled while monitoring syncs");
        self.stop_engine().await;
        MonitorOutcome::Cancelled
    }

    async fn timed_out(
        &self,
        tracker: &CompletionTracker,
        timeout: Option<std::time::Duration>,
    ) -> MonitorOutcome {
        let pending = tracker.pending();
        error!(
            component = "monitor",
            timeout = ?timeout,
            incomplete = ?pending,
            "Timed out waiting for run-once syncs"
        );
        self.stop_engine().await;
        MonitorOutcome::TimedOut { pending }
    }

    fn republish(&self, line: &str) {
        info!(target: ENGINE_LOG_COMPONENT, "{line}");
        self.publisher.publish(LogRecord::engine_line(line));
    }

    async fn stop_engine(&self) {
        if let Err(e) = self.engine.stop_engine().await {
            error!(component = "monitor", error = %e, "Failed to stop engine");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
