//! The structured record carried by the log distribution boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Component tag for lines read from the engine's own log file.
pub const ENGINE_LOG_COMPONENT: &str = "engine_log";

/// One published log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// Upper-case level name (`INFO`, `WARN`, ...).
    pub level: String,
    pub message: String,
    pub component: String,
}

impl LogRecord {
    pub fn new(
        level: impl Into<String>,
        message: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.into(),
            message: message.into(),
            component: component.into(),
        }
    }

    /// A verbatim engine log line.
    pub fn engine_line(line: impl Into<String>) -> Self {
        Self::new("INFO", line, ENGINE_LOG_COMPONENT)
    }
}
