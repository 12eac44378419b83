//! Remote-write dedup state.
//!
//! Two things are tracked per local chat: the canonical remote project it is
//! mapped to, and the message ids the remote has confirmed. Ids are only
//! recorded after a confirmed write.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::local::namespaces::{PROJECT_MAP, SYNC_CONFIRMED};
use crate::local::{LocalStore, StoreResult};

/// Cached local chat to remote project mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub project_id: String,
    pub user_id: String,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn confirmed_ids(&self, chat_id: &str) -> StoreResult<HashSet<String>>;

    async fn confirm(&self, chat_id: &str, message_id: &str) -> StoreResult<()>;

    async fn is_confirmed(&self, chat_id: &str, message_id: &str) -> StoreResult<bool> {
        Ok(self.confirmed_ids(chat_id).await?.contains(message_id))
    }

    async fn project(&self, chat_id: &str) -> StoreResult<Option<ProjectRef>>;

    async fn set_project(&self, chat_id: &str, project: &ProjectRef) -> StoreResult<()>;
}

/// Dedup state persisted in the local store.
#[derive(Debug, Clone)]
pub struct LocalDedupStore {
    store: LocalStore,
}

impl LocalDedupStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DedupStore for LocalDedupStore {
    async fn confirmed_ids(&self, chat_id: &str) -> StoreResult<HashSet<String>> {
        let prefix = format!("{}/", chat_id);
        // The value holds the owning chat id, so chats whose id contains '/'
        // cannot leak into each other's prefix.
        Ok(self
            .store
            .list_json::<String>(SYNC_CONFIRMED, &prefix)
            .await?
            .into_iter()
            .filter(|(_, owner)| owner == chat_id)
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }

    async fn confirm(&self, chat_id: &str, message_id: &str) -> StoreResult<()> {
        let key = format!("{}/{}", chat_id, message_id);
        self.store.put_json(SYNC_CONFIRMED, &key, chat_id).await
    }

    async fn is_confirmed(&self, chat_id: &str, message_id: &str) -> StoreResult<bool> {
        let key = format!("{}/{}", chat_id, message_id);
        Ok(self
            .store
            .get_json::<String>(SYNC_CONFIRMED, &key)
            .await?
            .is_some_and(|owner| owner == chat_id))
    }

    async fn project(&self, chat_id: &str) -> StoreResult<Option<ProjectRef>> {
        self.store.get_json(PROJECT_MAP, chat_id).await
    }

    async fn set_project(&self, chat_id: &str, project: &ProjectRef) -> StoreResult<()> {
        self.store.put_json(PROJECT_MAP, chat_id, project).await
    }
}

/// Volatile dedup state.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    confirmed: DashMap<String, HashSet<String>>,
    projects: DashMap<String, ProjectRef>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every confirmed id, by chat.
    pub fn all_confirmed(&self) -> HashMap<String, HashSet<String>> {
        self.confirmed
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn confirmed_ids(&self, chat_id: &str) -> StoreResult<HashSet<String>> {
        Ok(self
            .confirmed
            .get(chat_id)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }

    async fn confirm(&self, chat_id: &str, message_id: &str) -> StoreResult<()> {
        self.confirmed
            .entry(chat_id.to_string())
            .or_default()
            .insert(message_id.to_string());
        Ok(())
    }

    async fn project(&self, chat_id: &str) -> StoreResult<Option<ProjectRef>> {
        Ok(self.projects.get(chat_id).map(|p| p.clone()))
    }

    async fn set_project(&self, chat_id: &str, project: &ProjectRef) -> StoreResult<()> {
        self.projects.insert(chat_id.to_string(), project.clone());
        Ok(())
    }
}
