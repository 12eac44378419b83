//! Snapshot engine on top of the local store.

use tether_protocol::{FileState, Snapshot};
use tracing::{debug, info, instrument};

use super::rewind::{RewindResult, compute_rewind, replay_file_state};
use super::{SnapshotConfig, SnapshotError, SnapshotResult};
use crate::clock::SharedClock;
use crate::local::{KeyedGuard, LocalStore};

#[derive(Debug, Clone)]
pub struct SnapshotEngine {
    store: LocalStore,
    config: SnapshotConfig,
    clock: SharedClock,
}

impl SnapshotEngine {
    pub fn new(store: LocalStore, config: SnapshotConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Store a new snapshot. The anchor must be in the chat's active history.
    #[instrument(skip(self, file_state, summary))]
    pub async fn take_snapshot(
        &self,
        chat_id: &str,
        anchor_message_id: &str,
        file_state: FileState,
        summary: Option<String>,
    ) -> SnapshotResult<Snapshot> {
        let record = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| SnapshotError::ChatNotFound(chat_id.to_string()))?;

        if record.position_of(anchor_message_id).is_none() {
            return Err(SnapshotError::MessageNotFound {
                chat_id: chat_id.to_string(),
                message_id: anchor_message_id.to_string(),
            });
        }

        let snapshot = Snapshot {
            chat_id: chat_id.to_string(),
            anchor_message_id: anchor_message_id.to_string(),
            file_state,
            summary,
            created_at: self.clock.now_ms(),
        };
        self.store.put_snapshot(&snapshot).await?;
        debug!(files = snapshot.file_state.len(), "Stored snapshot");

        Ok(snapshot)
    }

    /// Compute a rewind without persisting anything.
    pub async fn rewind(&self, chat_id: &str, target_message_id: &str) -> SnapshotResult<RewindResult> {
        let record = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| SnapshotError::ChatNotFound(chat_id.to_string()))?;
        let snapshots = self.store.list_snapshots(chat_id).await?;
        compute_rewind(&record, &snapshots, target_message_id)
    }

    /// Rewind and persist: the active history is replaced, removed messages
    /// move to `archived`, the workspace is restored and the chat is marked
    /// dirty so the next sync picks it up.
    #[instrument(skip(self))]
    pub async fn apply_rewind(
        &self,
        chat_id: &str,
        target_message_id: &str,
    ) -> SnapshotResult<RewindResult> {
        let guard = self.store.lock_chat(chat_id).await;
        self.apply_rewind_locked(&guard, chat_id, target_message_id)
            .await
    }

    /// [`Self::apply_rewind`] for a caller already holding the chat lock.
    pub(crate) async fn apply_rewind_locked(
        &self,
        _guard: &KeyedGuard,
        chat_id: &str,
        target_message_id: &str,
    ) -> SnapshotResult<RewindResult> {
        let mut record = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| SnapshotError::ChatNotFound(chat_id.to_string()))?;
        let snapshots = self.store.list_snapshots(chat_id).await?;
        let result = compute_rewind(&record, &snapshots, target_message_id)?;

        record.messages = result.messages.clone();
        record.archived.extend(result.archived.iter().cloned());
        record.metadata.rewound_to = Some(target_message_id.to_string());
        record.metadata.updated_at = self.clock.now_ms();

        self.store.put_chat(&record).await?;
        self.store.put_workspace(chat_id, &result.file_state).await?;
        self.store.mark_dirty(chat_id).await?;

        info!(
            active = result.messages.len(),
            archived = result.archived.len(),
            "Applied rewind"
        );
        Ok(result)
    }

    /// Take a snapshot at the last message once enough messages have piled
    /// up after the latest anchor.
    #[instrument(skip(self, summary))]
    pub async fn maybe_compact(
        &self,
        chat_id: &str,
        summary: Option<String>,
    ) -> SnapshotResult<Option<Snapshot>> {
        if self.config.compaction_threshold == 0 {
            return Ok(None);
        }

        let Some(record) = self.store.get_chat(chat_id).await? else {
            return Ok(None);
        };
        let Some(last) = record.messages.len().checked_sub(1) else {
            return Ok(None);
        };
        let snapshots = self.store.list_snapshots(chat_id).await?;

        let latest_anchor = snapshots
            .iter()
            .filter_map(|s| record.position_of(&s.anchor_message_id))
            .max();
        let since_anchor = match latest_anchor {
            Some(pos) => last - pos,
            None => record.messages.len(),
        };
        if since_anchor < self.config.compaction_threshold {
            return Ok(None);
        }

        let file_state = replay_file_state(&record, &snapshots, last);
        let anchor = record.messages[last].id.clone();
        self.take_snapshot(chat_id, &anchor, file_state, summary)
            .await
            .map(Some)
    }

    pub async fn list_snapshots(&self, chat_id: &str) -> SnapshotResult<Vec<Snapshot>> {
        Ok(self.store.list_snapshots(chat_id).await?)
    }
}
