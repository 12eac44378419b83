//! Typed access to the local store.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_protocol::{ChatHistoryRecord, FileState, Snapshot};
use tokio::sync::Mutex;

use super::{KeyedGuard, KeyedLocks, KvStore, StoreResult};

/// Namespaces used inside the key-value store.
pub mod namespaces {
    pub const CHATS: &str = "chats";
    pub const DIRTY: &str = "dirty";
    pub const SNAPSHOTS: &str = "snapshots";
    pub const WORKSPACE: &str = "workspace";
    pub const CANVAS: &str = "canvas";
    pub const META: &str = "meta";
    pub const SYNC_QUEUE: &str = "sync_queue";
    pub const SYNC_QUEUE_KEYS: &str = "sync_queue_keys";
    pub const SYNC_QUEUE_CHATS: &str = "sync_queue_chats";
    pub const SYNC_CONFIRMED: &str = "sync_confirmed";
    pub const PROJECT_MAP: &str = "project_map";
}

use namespaces::*;

/// Local store handle. Cheap to clone; clones share the chat locks and the
/// counter lock.
#[derive(Clone)]
pub struct LocalStore {
    kv: Arc<dyn KvStore>,
    chat_locks: KeyedLocks,
    counters: Arc<Mutex<()>>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            chat_locks: KeyedLocks::new(),
            counters: Arc::new(Mutex::new(())),
        }
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(super::MemoryKvStore::new()))
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    // ========== Generic JSON helpers ==========

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        match self.kv.get(namespace, key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.put(namespace, key, &raw).await
    }

    pub async fn list_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> StoreResult<Vec<(String, T)>> {
        self.kv
            .list_prefix(namespace, prefix)
            .await?
            .into_iter()
            .map(|(key, raw)| Ok((key, serde_json::from_str(&raw)?)))
            .collect()
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()> {
        self.kv.delete(namespace, key).await
    }

    /// Serialize read-modify-write cycles on one chat's record, workspace
    /// and dirty marker. Not reentrant.
    pub async fn lock_chat(&self, chat_id: &str) -> KeyedGuard {
        self.chat_locks.lock(chat_id).await
    }

    /// Next value of a persisted monotonic counter, starting at 1.
    pub async fn next_seq(&self, name: &str) -> StoreResult<u64> {
        let _guard = self.counters.lock().await;
        let current: u64 = self.get_json(META, name).await?.unwrap_or(0);
        let next = current + 1;
        self.put_json(META, name, &next).await?;
        Ok(next)
    }

    // ========== Chats ==========

    pub async fn get_chat(&self, chat_id: &str) -> StoreResult<Option<ChatHistoryRecord>> {
        self.get_json(CHATS, chat_id).await
    }

    /// Replace the whole record.
    pub async fn put_chat(&self, record: &ChatHistoryRecord) -> StoreResult<()> {
        self.put_json(CHATS, &record.chat_id, record).await
    }

    pub async fn list_chats(&self) -> StoreResult<Vec<ChatHistoryRecord>> {
        Ok(self
            .list_json::<ChatHistoryRecord>(CHATS, "")
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    // ========== Dirty markers ==========

    pub async fn mark_dirty(&self, chat_id: &str) -> StoreResult<()> {
        self.kv.put(DIRTY, chat_id, "1").await
    }

    pub async fn clear_dirty(&self, chat_id: &str) -> StoreResult<()> {
        self.kv.delete(DIRTY, chat_id).await
    }

    pub async fn is_dirty(&self, chat_id: &str) -> StoreResult<bool> {
        self.kv.exists(DIRTY, chat_id).await
    }

    pub async fn dirty_chats(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .kv
            .list(DIRTY)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    // ========== Snapshots ==========

    /// Store a snapshot. Snapshots are never overwritten.
    pub async fn put_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let seq = self.next_seq("snapshot_seq").await?;
        let key = format!("{}/{:020}", snapshot.chat_id, seq);
        self.put_json(SNAPSHOTS, &key, snapshot).await
    }

    /// Snapshots of a chat in the order they were taken.
    pub async fn list_snapshots(&self, chat_id: &str) -> StoreResult<Vec<Snapshot>> {
        let prefix = format!("{}/", chat_id);
        Ok(self
            .list_json::<Snapshot>(SNAPSHOTS, &prefix)
            .await?
            .into_iter()
            .map(|(_, snapshot)| snapshot)
            .filter(|snapshot| snapshot.chat_id == chat_id)
            .collect())
    }

    // ========== Workspace files ==========

    pub async fn get_workspace(&self, chat_id: &str) -> StoreResult<FileState> {
        Ok(self.get_json(WORKSPACE, chat_id).await?.unwrap_or_default())
    }

    pub async fn put_workspace(&self, chat_id: &str, files: &FileState) -> StoreResult<()> {
        self.put_json(WORKSPACE, chat_id, files).await
    }

    // ========== Canvas screens ==========

    pub async fn get_canvas(&self, chat_id: &str, screen_name: &str) -> StoreResult<Option<String>> {
        self.kv.get(CANVAS, &format!("{}/{}", chat_id, screen_name)).await
    }

    pub async fn put_canvas(&self, chat_id: &str, screen_name: &str, html: &str) -> StoreResult<()> {
        self.kv
            .put(CANVAS, &format!("{}/{}", chat_id, screen_name), html)
            .await
    }
}
