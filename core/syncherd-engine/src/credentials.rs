//! Credential provisioning for the engine's database connections.
//!
//! The engine reads passwords from a libpq password file. [`PgpassFile`]
//! writes one entry per connection before a reconciliation cycle and removes
//! the file afterwards.

use crate::error::EngineResult;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use syncherd_types::{CredentialError, DatabaseSpec};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// One line of a password file.
#[derive(Clone, PartialEq, Eq)]
pub struct PgpassEntry {
    pub host: String,
    /// `None` matches any port.
    pub port: Option<u16>,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl PgpassEntry {
    /// Builds an entry for a declared database, resolving delegated passwords.
    pub fn for_database(db: &DatabaseSpec) -> Result<Self, CredentialError> {
        Ok(Self {
            host: db.host.clone(),
            port: db.port,
            dbname: db.dbname.clone(),
            user: db.user.clone(),
            password: db.password()?,
        })
    }

    /// Renders the `host:port:dbname:user:password` line.
    pub fn line(&self) -> String {
        let port = self
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "*".to_string());
        format!(
            "{}:{}:{}:{}:{}",
            escape(&self.host),
            port,
            escape(&self.dbname),
            escape(&self.user),
            escape(&self.password)
        )
    }
}

impl fmt::Debug for PgpassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgpassEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

fn escape(field: &str) -> String {
    field.replace('\\', r"\\").replace(':', r"\:")
}

/// Makes connection credentials available to the engine.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Replaces any previous credentials with `entries`.
    async fn provision(&self, entries: &[PgpassEntry]) -> EngineResult<()>;

    /// Removes provisioned credentials.
    async fn cleanup(&self) -> EngineResult<()>;
}

/// A libpq password file.
#[derive(Debug, Clone)]
pub struct PgpassFile {
    path: PathBuf,
    owner: Option<String>,
}

impl PgpassFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
        }
    }

    /// Transfers ownership of the file to `owner` after writing.
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn chown(&self, owner: &str) {
        let spec = format!("{owner}:{owner}");
        match tokio::process::Command::new("chown")
            .arg(&spec)
            .arg(&self.path)
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(path = %self.path.display(), %status, "chown of password file failed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "chown of password file failed"),
        }
    }
}

#[async_trait]
impl CredentialStore for PgpassFile {
    async fn provision(&self, entries: &[PgpassEntry]) -> EngineResult<()> {
        info!(path = %self.path.display(), entries = entries.len(), "Writing password file");
        remove_if_present(&self.path).await?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&self.path).await?;

        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&entry.line());
            contents.push('\n');
        }
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;

        if let Some(owner) = &self.owner {
            self.chown(owner).await;
        }
        Ok(())
    }

    async fn cleanup(&self) -> EngineResult<()> {
        info!(path = %self.path.display(), "Removing password file");
        remove_if_present(&self.path).await
    }
}

async fn remove_if_present(path: &Path) -> EngineResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
