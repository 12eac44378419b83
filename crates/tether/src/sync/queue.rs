//! Durable sync queue.
//!
//! Entries live in the local store keyed by a zero-padded sequence number, so
//! listing the namespace yields FIFO order. A second namespace maps natural
//! keys to entries; pushing an op whose key is already queued replaces that
//! entry's payload in place and bumps its revision. A third indexes entries
//! by chat so pending work for one chat is found without a full scan.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::ops::{SyncOp, SyncQueueEntry};
use crate::local::namespaces::{SYNC_QUEUE, SYNC_QUEUE_CHATS, SYNC_QUEUE_KEYS};
use crate::local::{LocalStore, StoreResult};

const SEQ_COUNTER: &str = "sync_queue_seq";

fn entry_key(seq: u64) -> String {
    format!("{:020}", seq)
}

fn chat_index_key(chat_id: &str, seq: u64) -> String {
    format!("{}/{}", chat_id, entry_key(seq))
}

#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    // Serializes read-modify-write cycles on the queue.
    lock: Arc<Mutex<()>>,
}

impl SyncQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append an op, or replace the payload of the queued op with the same key.
    pub async fn push(&self, op: SyncOp, now_ms: i64) -> StoreResult<SyncQueueEntry> {
        let _guard = self.lock.lock().await;
        let key = op.natural_key();

        if let Some(existing_key) = self.store.get_json::<String>(SYNC_QUEUE_KEYS, &key).await? {
            if let Some(mut entry) = self
                .store
                .get_json::<SyncQueueEntry>(SYNC_QUEUE, &existing_key)
                .await?
            {
                entry.op = op;
                entry.revision += 1;
                self.store.put_json(SYNC_QUEUE, &existing_key, &entry).await?;
                debug!(key = %entry.key, revision = entry.revision, "Coalesced queued op");
                return Ok(entry);
            }
        }

        let seq = self.store.next_seq(SEQ_COUNTER).await?;
        let entry = SyncQueueEntry::new(op, seq, now_ms);
        let stored_key = entry_key(seq);
        self.store.put_json(SYNC_QUEUE, &stored_key, &entry).await?;
        self.store.put_json(SYNC_QUEUE_KEYS, &key, &stored_key).await?;
        self.store
            .kv()
            .put(SYNC_QUEUE_CHATS, &chat_index_key(entry.op.chat_id(), seq), "")
            .await?;
        debug!(key = %entry.key, op_id = %entry.op_id, "Queued op");
        Ok(entry)
    }

    /// All entries in FIFO order.
    pub async fn entries(&self) -> StoreResult<Vec<SyncQueueEntry>> {
        Ok(self
            .store
            .list_json::<SyncQueueEntry>(SYNC_QUEUE, "")
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.store.kv().list(SYNC_QUEUE).await?.len())
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn has_pending_for_chat(&self, chat_id: &str) -> StoreResult<bool> {
        let prefix = format!("{}/", chat_id);
        Ok(self
            .store
            .kv()
            .list_prefix(SYNC_QUEUE_CHATS, &prefix)
            .await?
            .iter()
            // "c1/" also prefixes the entries of a chat named "c1/x".
            .any(|(key, _)| !key[prefix.len()..].contains('/')))
    }

    /// Remove an entry unless its payload was replaced since it was read.
    pub async fn remove_if_unchanged(&self, entry: &SyncQueueEntry) -> StoreResult<bool> {
        let _guard = self.lock.lock().await;
        let stored_key = entry_key(entry.seq);

        match self
            .store
            .get_json::<SyncQueueEntry>(SYNC_QUEUE, &stored_key)
            .await?
        {
            Some(stored) if stored.revision == entry.revision => {}
            _ => return Ok(false),
        }

        self.store.delete(SYNC_QUEUE, &stored_key).await?;
        self.store
            .delete(SYNC_QUEUE_CHATS, &chat_index_key(entry.op.chat_id(), entry.seq))
            .await?;
        if self.store.get_json::<String>(SYNC_QUEUE_KEYS, &entry.key).await?
            == Some(stored_key)
        {
            self.store.delete(SYNC_QUEUE_KEYS, &entry.key).await?;
        }
        Ok(true)
    }

    /// Store retry bookkeeping unless the payload was replaced meanwhile.
    pub async fn update_if_unchanged(&self, entry: &SyncQueueEntry) -> StoreResult<bool> {
        let _guard = self.lock.lock().await;
        let stored_key = entry_key(entry.seq);

        match self
            .store
            .get_json::<SyncQueueEntry>(SYNC_QUEUE, &stored_key)
            .await?
        {
            Some(stored) if stored.revision == entry.revision => {
                self.store.put_json(SYNC_QUEUE, &stored_key, entry).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
