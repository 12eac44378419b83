//! Shared types for the tether sync core.
//!
//! These are the records exchanged between the chat layer, the local store,
//! the snapshot engine and the remote store. They carry no behavior beyond
//! small helpers for ordering and file-state replay.

pub mod chat;
pub mod messages;
pub mod snapshot;

pub use chat::{ChatHistoryRecord, ChatMetadata};
pub use messages::{FileChange, Message, ModelMetadata, Role};
pub use snapshot::{FileState, Snapshot, apply_file_changes};
