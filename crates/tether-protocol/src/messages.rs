//! Canonical message types.
//!
//! Messages are the persistent units of a conversation. They are created by
//! the chat layer once a response has finished streaming and are never edited
//! afterwards; a chat only ever grows by appending.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated, unique within the chat.
    pub id: String,

    /// Local chat this message belongs to.
    pub chat_id: String,

    /// Message role.
    pub role: Role,

    /// Rendered text content.
    pub content: String,

    /// Unix milliseconds.
    pub created_at: i64,

    /// Model details and workspace side effects (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_metadata: Option<ModelMetadata>,
}

impl Message {
    /// Create a message without model metadata.
    pub fn new(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            created_at,
            model_metadata: None,
        }
    }

    /// Attach model metadata.
    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.model_metadata = Some(metadata);
        self
    }

    /// File writes produced by this message, in order.
    pub fn file_changes(&self) -> &[FileChange] {
        self.model_metadata
            .as_ref()
            .map(|m| m.file_changes.as_slice())
            .unwrap_or(&[])
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// Model details attached to a finished message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model ID (e.g. "claude-sonnet-4-20250514").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider (e.g. "anthropic").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Workspace files written by this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_changes: Vec<FileChange>,

    /// Forward-compatible extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// A single workspace file write. `content: None` deletes the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl FileChange {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }
}
