//! Snapshots and deterministic rewind.
//!
//! A snapshot records the full workspace file state as of an anchor message.
//! Rewinding to a message restores the file state from the nearest snapshot
//! at or before it, then replays the file changes of the messages in
//! between. The computation is pure; [`SnapshotEngine`] persists results to
//! the local store.

mod engine;
mod rewind;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;
use crate::local::StoreError;

pub use engine::SnapshotEngine;
pub use rewind::{RewindResult, compute_rewind, replay_file_state};

/// Snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Messages after the latest anchor that trigger an automatic snapshot.
    /// Zero disables compaction.
    pub compaction_threshold: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// The message is not part of the chat's active history.
    #[error("message {message_id} not in active history of chat {chat_id}")]
    MessageNotFound { chat_id: String, message_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

impl From<SnapshotError> for CoreError {
    fn from(err: SnapshotError) -> Self {
        CoreError::internal(err)
    }
}
