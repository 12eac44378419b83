//! Remote store trait and records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::Message;

use super::RemoteResult;

/// Canonical remote project, one per local chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub local_chat_id: String,
    pub user_id: String,
    pub description: String,
    pub url_slug: Option<String>,
    pub metadata: Value,
    pub rewound_to: Option<String>,
    /// Message ids removed from active history by a rewind.
    pub archived_message_ids: Vec<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
}

/// Fields needed to create a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub local_chat_id: String,
    pub user_id: String,
    pub description: String,
    pub url_slug: Option<String>,
    pub metadata: Value,
}

/// Full replacement of a project's mutable fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub description: String,
    pub url_slug: Option<String>,
    pub metadata: Value,
    pub rewound_to: Option<String>,
    pub archived_message_ids: Vec<String>,
}

/// A workspace file as stored remotely. `content: None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: Option<String>,
    pub updated_at: i64,
}

/// The authoritative store.
///
/// Every write is an upsert keyed by a natural key, so applying the same
/// operation twice leaves one row.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find_project_by_chat(&self, local_chat_id: &str)
    -> RemoteResult<Option<ProjectRecord>>;

    async fn get_project(&self, project_id: &str) -> RemoteResult<Option<ProjectRecord>>;

    /// Create a project. Fails with `Conflict` if the local chat already has one.
    async fn create_project(&self, project: NewProject) -> RemoteResult<ProjectRecord>;

    async fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> RemoteResult<()>;

    async fn upsert_message(&self, project_id: &str, message: &Message) -> RemoteResult<()>;

    /// Write a file, or tombstone it when `content` is `None`.
    async fn upsert_file(
        &self,
        project_id: &str,
        path: &str,
        content: Option<&str>,
    ) -> RemoteResult<()>;

    async fn upsert_canvas(&self, project_id: &str, screen_name: &str, html: &str)
    -> RemoteResult<()>;

    /// Messages of a project in conversation order, tagged with `chat_id`.
    async fn load_messages(&self, project_id: &str, chat_id: &str) -> RemoteResult<Vec<Message>>;

    /// Files of a project ordered by path, tombstones included.
    async fn load_files(&self, project_id: &str) -> RemoteResult<Vec<RemoteFile>>;
}
