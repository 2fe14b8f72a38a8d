//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;
use syncherd_engine::{ConnectionParams, PgpassEntry};

/// The engine's own state database, reached as a superuser.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineDatabase {
    /// Database name; also the engine's role name.
    pub name: String,
    pub host: String,
    /// Superuser login.
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl Default for EngineDatabase {
    fn default() -> Self {
        Self {
            name: "bucardo".to_string(),
            host: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "changeme".to_string(),
            port: 5432,
        }
    }
}

impl std::fmt::Debug for EngineDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDatabase")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl EngineDatabase {
    pub fn connection(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            dbname: self.name.clone(),
        }
    }

    /// Password entries for the engine role and the superuser.
    pub fn pgpass_entries(&self) -> [PgpassEntry; 2] {
        let entry = |user: &str| PgpassEntry {
            host: self.host.clone(),
            port: Some(self.port),
            dbname: self.name.clone(),
            user: user.to_string(),
            password: self.password.clone(),
        };
        [entry(&self.name), entry(&self.user)]
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub engine_db: EngineDatabase,
    /// The engine's log file, followed by the completion monitor.
    pub log_path: PathBuf,
    pub tail_poll_interval: Duration,
    /// Fall back to direct state deletion when the engine refuses a delete.
    pub fallback_deletion: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine_db: EngineDatabase::default(),
            log_path: PathBuf::from("/var/log/bucardo/log.bucardo"),
            tail_poll_interval: Duration::from_millis(250),
            fallback_deletion: true,
        }
    }
}

impl ServiceConfig {
    pub fn with_engine_db(mut self, engine_db: EngineDatabase) -> Self {
        self.engine_db = engine_db;
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn with_tail_poll_interval(mut self, interval: Duration) -> Self {
        self.tail_poll_interval = interval;
        self
    }

    pub fn with_fallback_deletion(mut self, enabled: bool) -> Self {
        self.fallback_deletion = enabled;
        self
    }
}
