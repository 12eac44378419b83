//! Chat history records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::Message;

/// One chat/project as held by the local store.
///
/// Records are always written whole; there is no partial update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryRecord {
    pub chat_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_slug: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Active, editable history in conversation order.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Messages removed from active history by a rewind. Kept for audit and
    /// undo, never synced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archived: Vec<Message>,

    #[serde(default)]
    pub metadata: ChatMetadata,
}

/// Free-form chat metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMetadata {
    /// Unix milliseconds.
    #[serde(default)]
    pub created_at: i64,

    /// Unix milliseconds.
    #[serde(default)]
    pub updated_at: i64,

    /// Message the chat was last rewound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewound_to: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ChatHistoryRecord {
    /// Create an empty record.
    pub fn new(chat_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            chat_id: chat_id.into(),
            url_slug: None,
            description: String::new(),
            messages: Vec::new(),
            archived: Vec::new(),
            metadata: ChatMetadata {
                created_at: now_ms,
                updated_at: now_ms,
                ..Default::default()
            },
        }
    }

    /// Position of a message in the active history.
    pub fn position_of(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    /// Whether the id is known, active or archived.
    pub fn contains(&self, message_id: &str) -> bool {
        self.position_of(message_id).is_some() || self.archived.iter().any(|m| m.id == message_id)
    }

    /// Append a message. Returns false if the id is already present.
    pub fn append(&mut self, message: Message, now_ms: i64) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        self.metadata.updated_at = now_ms;
        true
    }

    pub fn last_message_id(&self) -> Option<&str> {
        self.messages.last().map(|m| m.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    #[test]
    fn test_append_rejects_duplicate_ids() {
        let mut record = ChatHistoryRecord::new("c1", 10);
        assert!(record.append(Message::new("m1", "c1", Role::User, "a", 11), 11));
        assert!(!record.append(Message::new("m1", "c1", Role::User, "b", 12), 12));
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.metadata.updated_at, 11);
    }

    #[test]
    fn test_archived_ids_count_as_known() {
        let mut record = ChatHistoryRecord::new("c1", 0);
        record
            .archived
            .push(Message::new("old", "c1", Role::User, "x", 0));
        assert!(record.contains("old"));
        assert_eq!(record.position_of("old"), None);
        assert!(!record.append(Message::new("old", "c1", Role::User, "x", 1), 1));
    }
}
