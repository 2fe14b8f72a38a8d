use crate::{StateStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use syncherd_types::DesiredState;
use tracing::debug;

/// A store backed by a JSON file.
///
/// Saves write a sibling temporary file and rename it over the original, so a
/// reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the document exists on disk.
    pub async fn exists(&self) -> StoreResult<bool> {
        tokio::fs::try_exists(&self.path)
            .await
            .map_err(|source| self.io(source))
    }

    fn io(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> StoreResult<DesiredState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(self.io(e)),
        };
        debug!(path = %self.path.display(), bytes = bytes.len(), "Loaded configuration");
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, state: &DesiredState) -> StoreResult<()> {
        let mut json = serde_json::to_vec_pretty(state).map_err(StoreError::Encode)?;
        json.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io(source))?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|source| self.io(source))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|source| self.io(source))?;
        debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }
}
