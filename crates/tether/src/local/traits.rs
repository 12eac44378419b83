//! Key-value store trait definitions.

use async_trait::async_trait;

use super::StoreResult;

/// Namespaced string key-value store.
///
/// Keys are ordered lexicographically within a namespace; list operations
/// return entries in that order.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value.
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>>;

    /// Insert or replace a value.
    async fn put(&self, namespace: &str, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()>;

    /// List entries whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, namespace: &str, prefix: &str)
    -> StoreResult<Vec<(String, String)>>;

    /// List all entries of a namespace, ordered by key.
    async fn list(&self, namespace: &str) -> StoreResult<Vec<(String, String)>> {
        self.list_prefix(namespace, "").await
    }

    /// Check if a key exists.
    async fn exists(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }
}
