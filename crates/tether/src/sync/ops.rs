//! Queued remote operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::Message;
use uuid::Uuid;

/// Operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOpKind {
    UpsertMessage,
    UpsertProject,
    UpsertFile,
    UpsertCanvas,
}

impl std::fmt::Display for SyncOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpsertMessage => write!(f, "upsert_message"),
            Self::UpsertProject => write!(f, "upsert_project"),
            Self::UpsertFile => write!(f, "upsert_file"),
            Self::UpsertCanvas => write!(f, "upsert_canvas"),
        }
    }
}

/// An idempotent write against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOp {
    UpsertMessage {
        chat_id: String,
        message: Message,
    },
    UpsertProject {
        chat_id: String,
        description: String,
        #[serde(default)]
        url_slug: Option<String>,
        #[serde(default)]
        metadata: Value,
        #[serde(default)]
        rewound_to: Option<String>,
        #[serde(default)]
        archived_message_ids: Vec<String>,
    },
    UpsertFile {
        chat_id: String,
        path: String,
        /// `None` deletes the file.
        #[serde(default)]
        content: Option<String>,
    },
    UpsertCanvas {
        chat_id: String,
        screen_name: String,
        html: String,
    },
}

impl SyncOp {
    pub fn kind(&self) -> SyncOpKind {
        match self {
            Self::UpsertMessage { .. } => SyncOpKind::UpsertMessage,
            Self::UpsertProject { .. } => SyncOpKind::UpsertProject,
            Self::UpsertFile { .. } => SyncOpKind::UpsertFile,
            Self::UpsertCanvas { .. } => SyncOpKind::UpsertCanvas,
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Self::UpsertMessage { chat_id, .. }
            | Self::UpsertProject { chat_id, .. }
            | Self::UpsertFile { chat_id, .. }
            | Self::UpsertCanvas { chat_id, .. } => chat_id,
        }
    }

    /// Key of the remote record this op writes. Two ops with the same key
    /// write the same row, so only the latest needs to be sent.
    pub fn natural_key(&self) -> String {
        match self {
            Self::UpsertMessage { chat_id, message } => {
                format!("message:{}:{}", chat_id, message.id)
            }
            Self::UpsertProject { chat_id, .. } => format!("project:{}", chat_id),
            Self::UpsertFile { chat_id, path, .. } => format!("file:{}:{}", chat_id, path),
            Self::UpsertCanvas {
                chat_id,
                screen_name,
                ..
            } => format!("canvas:{}:{}", chat_id, screen_name),
        }
    }
}

/// A durable queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub op_id: String,
    /// Natural key used for coalescing.
    pub key: String,
    /// Position in the queue.
    pub seq: u64,
    /// Bumped every time the payload is replaced.
    pub revision: u64,
    pub op: SyncOp,
    /// Unix milliseconds.
    pub enqueued_at: i64,
    pub retry_count: u32,
    /// Unix milliseconds. `None` means due now.
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncQueueEntry {
    pub fn new(op: SyncOp, seq: u64, now_ms: i64) -> Self {
        Self {
            op_id: Uuid::new_v4().to_string(),
            key: op.natural_key(),
            seq,
            revision: 0,
            op,
            enqueued_at: now_ms,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn kind(&self) -> SyncOpKind {
        self.op.kind()
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::Role;

    #[test]
    fn test_natural_keys() {
        let op = SyncOp::UpsertMessage {
            chat_id: "c1".into(),
            message: Message::new("m1", "c1", Role::User, "hi", 0),
        };
        assert_eq!(op.natural_key(), "message:c1:m1");
        assert_eq!(op.kind(), SyncOpKind::UpsertMessage);

        let op = SyncOp::UpsertFile {
            chat_id: "c1".into(),
            path: "src/index.html".into(),
            content: None,
        };
        assert_eq!(op.natural_key(), "file:c1:src/index.html");
        assert_eq!(op.chat_id(), "c1");
    }

    #[test]
    fn test_op_is_tagged_by_kind() {
        let op = SyncOp::UpsertCanvas {
            chat_id: "c1".into(),
            screen_name: "home".into(),
            html: "<main/>".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "upsert_canvas");
        assert_eq!(json["screen_name"], "home");
    }

    #[test]
    fn test_entry_due() {
        let mut entry = SyncQueueEntry::new(
            SyncOp::UpsertCanvas {
                chat_id: "c1".into(),
                screen_name: "home".into(),
                html: String::new(),
            },
            1,
            100,
        );
        assert!(entry.is_due(0));
        entry.next_attempt_at = Some(500);
        assert!(!entry.is_due(499));
        assert!(entry.is_due(500));
    }
}
