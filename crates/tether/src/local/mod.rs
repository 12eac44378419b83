//! Client-side local store.
//!
//! A namespaced key-value layer with two backends:
//! - SQLite file (durable across restarts, the default)
//! - In-memory map (tests and ephemeral clients)
//!
//! [`LocalStore`] adds typed access for chats, snapshots, workspace files and
//! dirty markers on top of any [`KvStore`].

mod error;
mod locks;
mod memory;
mod sqlite;
mod store;
mod traits;

pub use error::{StoreError, StoreResult};
pub use locks::{KeyedGuard, KeyedLocks};
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
pub use store::{LocalStore, namespaces};
pub use traits::KvStore;

use std::path::PathBuf;
use std::sync::Arc;

/// Local store configuration.
#[derive(Debug, Clone)]
pub enum LocalStoreConfig {
    /// SQLite file at the given path.
    Sqlite(PathBuf),
    /// Volatile in-process map.
    Memory,
}

/// Open a local store based on configuration.
pub async fn open_local_store(config: LocalStoreConfig) -> StoreResult<LocalStore> {
    let kv: Arc<dyn KvStore> = match config {
        LocalStoreConfig::Sqlite(path) => Arc::new(SqliteKvStore::open(&path).await?),
        LocalStoreConfig::Memory => Arc::new(MemoryKvStore::new()),
    };
    Ok(LocalStore::new(kv))
}
