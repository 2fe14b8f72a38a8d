//! Desired-state persistence.
//!
//! [`StateStore`] is the load/save boundary for the declarative document.
//! [`JsonFileStore`] keeps it as pretty-printed JSON on disk and
//! [`MemoryStore`] keeps it in memory for tests and embedding.

mod error;
mod file;
mod memory;

pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use syncherd_types::DesiredState;

/// Load/save access to the desired-state document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the current document.
    async fn load(&self) -> StoreResult<DesiredState>;

    /// Replaces the stored document.
    async fn save(&self, state: &DesiredState) -> StoreResult<()>;
}
