//! Chat persistence facade.
//!
//! The chat layer talks to this and nothing else: every write lands in the
//! local store first, then becomes a queued remote op.

use std::collections::BTreeMap;

use serde_json::Value;
use tether_protocol::{ChatHistoryRecord, FileState, Message, ModelMetadata, Role};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::CoreResult;
use crate::local::LocalStore;
use crate::remote::{ProjectRecord, RemoteError};
use crate::snapshot::{RewindResult, SnapshotEngine};
use crate::sync::{ProjectRef, SyncEngine, SyncOp};

#[derive(Debug, Clone)]
pub struct ChatService {
    local: LocalStore,
    sync: SyncEngine,
    snapshots: SnapshotEngine,
    clock: SharedClock,
}

impl ChatService {
    pub fn new(
        local: LocalStore,
        sync: SyncEngine,
        snapshots: SnapshotEngine,
        clock: SharedClock,
    ) -> Self {
        Self {
            local,
            sync,
            snapshots,
            clock,
        }
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn snapshots(&self) -> &SnapshotEngine {
        &self.snapshots
    }

    async fn load_or_create(&self, chat_id: &str) -> CoreResult<ChatHistoryRecord> {
        Ok(self
            .local
            .get_chat(chat_id)
            .await?
            .unwrap_or_else(|| ChatHistoryRecord::new(chat_id, self.clock.now_ms())))
    }

    /// Append a finished message and queue it for sync.
    ///
    /// Without an id a UUID is generated. Saving an id the chat already has
    /// returns the stored message and writes nothing. Saves to one chat are
    /// serialized.
    #[instrument(skip(self, content, model_metadata))]
    pub async fn save_chat_message(
        &self,
        id: Option<&str>,
        chat_id: &str,
        role: Role,
        content: &str,
        model_metadata: Option<ModelMetadata>,
    ) -> CoreResult<Message> {
        let _guard = self.local.lock_chat(chat_id).await;
        let mut record = self.load_or_create(chat_id).await?;

        if let Some(existing) = id.and_then(|id| {
            record
                .messages
                .iter()
                .chain(&record.archived)
                .find(|m| m.id == id)
        }) {
            debug!("Message already stored");
            return Ok(existing.clone());
        }

        let now = self.clock.now_ms();
        let mut message = Message::new(
            id.map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            chat_id,
            role,
            content,
            now,
        );
        message.model_metadata = model_metadata;

        record.append(message.clone(), now);
        self.local.put_chat(&record).await?;
        self.local.mark_dirty(chat_id).await?;

        self.sync.sync_chat(chat_id).await?;

        if let Err(e) = self.snapshots.maybe_compact(chat_id, None).await {
            warn!("Snapshot compaction failed: {}", e);
        }

        Ok(message)
    }

    /// Load a chat.
    ///
    /// Online and with nothing pending locally, the remote copy wins and is
    /// cached. Otherwise, or when the remote fails, the local copy is
    /// returned. A local write landing during the remote fetch also keeps the
    /// local copy.
    #[instrument(skip(self))]
    pub async fn load_chat(&self, chat_id: &str) -> CoreResult<Option<ChatHistoryRecord>> {
        let local = self.local.get_chat(chat_id).await?;
        if !self.sync.is_online() || self.local.is_dirty(chat_id).await? {
            return Ok(local);
        }

        let (record, workspace) = match self.load_remote(chat_id, local.clone()).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return Ok(local),
            Err(e) => {
                warn!("Remote load failed, using local copy: {}", e);
                return Ok(local);
            }
        };

        let _guard = self.local.lock_chat(chat_id).await;
        let current = self.local.get_chat(chat_id).await?;
        if current != local
            || self.local.is_dirty(chat_id).await?
            || self.sync.queue().has_pending_for_chat(chat_id).await?
        {
            debug!("Chat changed while loading remote copy, keeping local");
            return Ok(current);
        }
        self.local.put_chat(&record).await?;
        self.local.put_workspace(chat_id, &workspace).await?;
        Ok(Some(record))
    }

    async fn remote_project(&self, chat_id: &str) -> Result<Option<ProjectRecord>, RemoteError> {
        let remote = self.sync.remote();
        let cached = self
            .sync
            .dedup()
            .project(chat_id)
            .await
            .map_err(|e| RemoteError::Backend(e.to_string()))?;
        match cached {
            Some(ProjectRef { project_id, .. }) => remote.get_project(&project_id).await,
            None => remote.find_project_by_chat(chat_id).await,
        }
    }

    async fn load_remote(
        &self,
        chat_id: &str,
        local: Option<ChatHistoryRecord>,
    ) -> Result<Option<(ChatHistoryRecord, FileState)>, RemoteError> {
        let Some(user_id) = self.sync.current_user().await else {
            return Ok(None);
        };
        let Some(project) = self.remote_project(chat_id).await? else {
            return Ok(None);
        };
        if project.user_id != user_id {
            warn!(project_id = %project.id, "Remote project belongs to another user");
            return Ok(None);
        }

        let remote = self.sync.remote();
        let messages: Vec<Message> = remote
            .load_messages(&project.id, chat_id)
            .await?
            .into_iter()
            .filter(|m| !project.archived_message_ids.contains(&m.id))
            .collect();
        let files = remote.load_files(&project.id).await?;

        let mut record =
            local.unwrap_or_else(|| ChatHistoryRecord::new(chat_id, project.created_at));
        record.messages = messages;
        record.archived.retain(|m| record.messages.iter().all(|a| a.id != m.id));
        record.description = project.description;
        record.url_slug = project.url_slug;
        record.metadata.rewound_to = project.rewound_to;
        record.metadata.updated_at = project.updated_at;
        if let Value::Object(map) = project.metadata {
            record.metadata.extra = map.into_iter().collect();
        }

        let to_local = |e: crate::local::StoreError| RemoteError::Backend(e.to_string());
        let dedup = self.sync.dedup();
        for message in &record.messages {
            dedup.confirm(chat_id, &message.id).await.map_err(to_local)?;
        }
        dedup
            .set_project(
                chat_id,
                &ProjectRef {
                    project_id: project.id,
                    user_id: project.user_id,
                },
            )
            .await
            .map_err(to_local)?;

        let workspace: FileState = files
            .into_iter()
            .filter_map(|f| f.content.map(|content| (f.path, content)))
            .collect();

        Ok(Some((record, workspace)))
    }

    /// Update chat/project details locally and queue the project upsert.
    #[instrument(skip(self, description, metadata))]
    pub async fn save_project(
        &self,
        chat_id: &str,
        description: &str,
        url_slug: Option<&str>,
        metadata: Value,
    ) -> CoreResult<()> {
        let _guard = self.local.lock_chat(chat_id).await;
        let mut record = self.load_or_create(chat_id).await?;
        record.description = description.to_string();
        record.url_slug = url_slug.map(str::to_string);
        if let Value::Object(map) = &metadata {
            record.metadata.extra = map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>();
        }
        record.metadata.updated_at = self.clock.now_ms();

        self.local.put_chat(&record).await?;
        self.local.mark_dirty(chat_id).await?;
        self.sync.enqueue(project_op(&record, metadata)).await?;
        Ok(())
    }

    /// Write (or with `None`, delete) a workspace file.
    #[instrument(skip(self, content))]
    pub async fn save_file(
        &self,
        chat_id: &str,
        path: &str,
        content: Option<&str>,
    ) -> CoreResult<()> {
        let _guard = self.local.lock_chat(chat_id).await;
        let mut workspace = self.local.get_workspace(chat_id).await?;
        match content {
            Some(content) => {
                workspace.insert(path.to_string(), content.to_string());
            }
            None => {
                workspace.remove(path);
            }
        }
        self.local.put_workspace(chat_id, &workspace).await?;
        self.local.mark_dirty(chat_id).await?;
        self.sync
            .enqueue(SyncOp::UpsertFile {
                chat_id: chat_id.to_string(),
                path: path.to_string(),
                content: content.map(str::to_string),
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self, html))]
    pub async fn save_canvas(&self, chat_id: &str, screen_name: &str, html: &str) -> CoreResult<()> {
        self.local.put_canvas(chat_id, screen_name, html).await?;
        self.local.mark_dirty(chat_id).await?;
        self.sync
            .enqueue(SyncOp::UpsertCanvas {
                chat_id: chat_id.to_string(),
                screen_name: screen_name.to_string(),
                html: html.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Rewind a chat and queue the resulting state as ordinary writes.
    #[instrument(skip(self))]
    pub async fn rewind_to(&self, chat_id: &str, target_message_id: &str) -> CoreResult<RewindResult> {
        let guard = self.local.lock_chat(chat_id).await;
        let before = self.local.get_workspace(chat_id).await?;
        let result = self
            .snapshots
            .apply_rewind_locked(&guard, chat_id, target_message_id)
            .await?;

        for path in before.keys().filter(|p| !result.file_state.contains_key(*p)) {
            self.sync
                .enqueue(SyncOp::UpsertFile {
                    chat_id: chat_id.to_string(),
                    path: path.clone(),
                    content: None,
                })
                .await?;
        }
        for (path, content) in &result.file_state {
            if before.get(path) != Some(content) {
                self.sync
                    .enqueue(SyncOp::UpsertFile {
                        chat_id: chat_id.to_string(),
                        path: path.clone(),
                        content: Some(content.clone()),
                    })
                    .await?;
            }
        }

        if let Some(record) = self.local.get_chat(chat_id).await? {
            let metadata = Value::Object(record.metadata.extra.clone().into_iter().collect());
            self.sync.enqueue(project_op(&record, metadata)).await?;
        }
        self.sync.sync_chat(chat_id).await?;

        Ok(result)
    }
}

fn project_op(record: &ChatHistoryRecord, metadata: Value) -> SyncOp {
    SyncOp::UpsertProject {
        chat_id: record.chat_id.clone(),
        description: record.description.clone(),
        url_slug: record.url_slug.clone(),
        metadata,
        rewound_to: record.metadata.rewound_to.clone(),
        archived_message_ids: record.archived.iter().map(|m| m.id.clone()).collect(),
    }
}
