//! Sync notifications.

use serde::Serialize;

use super::ops::SyncOpKind;
use crate::error::CoreError;

/// Broadcast to subscribers as the queue drains.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Applied {
        op_id: String,
        key: String,
        kind: SyncOpKind,
        chat_id: String,
    },
    /// The entry was dropped from the queue.
    Failed {
        op_id: String,
        key: String,
        kind: SyncOpKind,
        chat_id: String,
        error: CoreError,
    },
    Connectivity {
        online: bool,
    },
}

impl SyncEvent {
    /// Stable code of a failure event.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Failed { error, .. } => Some(error.code()),
            _ => None,
        }
    }
}

/// Point-in-time engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub pending: usize,
    pub in_flight: bool,
    pub last_error: Option<String>,
}

/// Counters for one `process_queue` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub applied: usize,
    /// Failed attempts, whether retried later or dropped.
    pub failed: usize,
    pub dropped: usize,
    /// Entries not attempted: not yet due or behind a blocked entry.
    pub deferred: usize,
    /// Another drain was already running.
    pub skipped: bool,
}
