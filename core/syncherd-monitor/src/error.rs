use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The line stream ended while run-once syncs were still pending.
    #[error("engine log stream closed with {} sync(s) still pending", .pending.len())]
    StreamClosed { pending: Vec<String> },
}
