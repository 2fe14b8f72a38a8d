use crate::{StateStore, StoreResult};
use async_trait::async_trait;
use syncherd_types::DesiredState;
use tokio::sync::RwLock;

/// A store that keeps the document in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<DesiredState>,
}

impl MemoryStore {
    pub fn new(state: DesiredState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> StoreResult<DesiredState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &DesiredState) -> StoreResult<()> {
        *self.state.write().await = state.clone();
        Ok(())
    }
}
