//! Point-in-time workspace snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::messages::FileChange;

/// Workspace file contents keyed by path.
pub type FileState = BTreeMap<String, String>;

/// Full reconstructible file state as of `anchor_message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub chat_id: String,
    pub anchor_message_id: String,
    pub file_state: FileState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// Apply file writes to a state in order.
pub fn apply_file_changes<'a>(
    state: &mut FileState,
    changes: impl IntoIterator<Item = &'a FileChange>,
) {
    for change in changes {
        match &change.content {
            Some(content) => {
                state.insert(change.path.clone(), content.clone());
            }
            None => {
                state.remove(&change.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_file_changes_in_order() {
        let mut state = FileState::new();
        apply_file_changes(
            &mut state,
            &[
                FileChange::write("a.html", "1"),
                FileChange::write("b.css", "x"),
                FileChange::write("a.html", "2"),
                FileChange::delete("b.css"),
            ],
        );
        assert_eq!(state.len(), 1);
        assert_eq!(state["a.html"], "2");
    }
}
