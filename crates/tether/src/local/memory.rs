//! In-memory key-value store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KvStore, StoreResult};

/// Volatile store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<(String, String), String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_prefix(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> StoreResult<Vec<(String, String)>> {
        let entries = self.entries.read().await;
        let start = (namespace.to_string(), prefix.to_string());
        Ok(entries
            .range(start..)
            .take_while(|((ns, key), _)| ns == namespace && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }
}
