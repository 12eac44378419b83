//! Pure rewind computation.

use serde::{Deserialize, Serialize};
use tether_protocol::{ChatHistoryRecord, FileState, Message, Snapshot, apply_file_changes};

use super::{SnapshotError, SnapshotResult};

/// Outcome of rewinding a chat to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewindResult {
    pub chat_id: String,
    pub target_message_id: String,
    /// Anchor of the snapshot the replay started from, if any.
    pub anchor_message_id: Option<String>,
    /// New active history, anchor through target.
    pub messages: Vec<Message>,
    /// Messages leaving active history, before the anchor then after the target.
    pub archived: Vec<Message>,
    pub file_state: FileState,
}

/// Latest usable snapshot for a target position: highest anchor position at
/// or before it, later snapshots winning ties.
fn pick_snapshot<'a>(
    record: &ChatHistoryRecord,
    snapshots: &'a [Snapshot],
    target_pos: usize,
) -> Option<(usize, &'a Snapshot)> {
    let mut best: Option<(usize, &Snapshot)> = None;
    for snapshot in snapshots.iter().filter(|s| s.chat_id == record.chat_id) {
        let Some(pos) = record.position_of(&snapshot.anchor_message_id) else {
            continue;
        };
        if pos <= target_pos && best.is_none_or(|(best_pos, _)| pos >= best_pos) {
            best = Some((pos, snapshot));
        }
    }
    best
}

fn locate(record: &ChatHistoryRecord, message_id: &str) -> SnapshotResult<usize> {
    record
        .position_of(message_id)
        .ok_or_else(|| SnapshotError::MessageNotFound {
            chat_id: record.chat_id.clone(),
            message_id: message_id.to_string(),
        })
}

/// File state as of the message at `target_pos`, replayed from the nearest
/// snapshot (or from empty).
pub fn replay_file_state(
    record: &ChatHistoryRecord,
    snapshots: &[Snapshot],
    target_pos: usize,
) -> FileState {
    let (mut state, start) = match pick_snapshot(record, snapshots, target_pos) {
        Some((pos, snapshot)) => (snapshot.file_state.clone(), pos + 1),
        None => (FileState::new(), 0),
    };
    for message in record.messages.iter().take(target_pos + 1).skip(start) {
        apply_file_changes(&mut state, message.file_changes());
    }
    state
}

/// Rewind a chat to `target_message_id`.
///
/// Depends only on the record, the snapshots and the target. Applying the
/// result and rewinding to the same target again yields the same messages
/// and file state.
pub fn compute_rewind(
    record: &ChatHistoryRecord,
    snapshots: &[Snapshot],
    target_message_id: &str,
) -> SnapshotResult<RewindResult> {
    let target_pos = locate(record, target_message_id)?;

    let (anchor_pos, anchor_id, mut file_state) =
        match pick_snapshot(record, snapshots, target_pos) {
            Some((pos, snapshot)) => (
                pos,
                Some(snapshot.anchor_message_id.clone()),
                snapshot.file_state.clone(),
            ),
            None => (0, None, FileState::new()),
        };

    let replay_from = if anchor_id.is_some() { anchor_pos + 1 } else { 0 };
    for message in &record.messages[replay_from..=target_pos] {
        apply_file_changes(&mut file_state, message.file_changes());
    }

    let messages = record.messages[anchor_pos..=target_pos].to_vec();
    let archived = record.messages[..anchor_pos]
        .iter()
        .chain(&record.messages[target_pos + 1..])
        .cloned()
        .collect();

    Ok(RewindResult {
        chat_id: record.chat_id.clone(),
        target_message_id: target_message_id.to_string(),
        anchor_message_id: anchor_id,
        messages,
        archived,
        file_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::{FileChange, ModelMetadata, Role};

    fn msg(id: &str, changes: Vec<FileChange>) -> Message {
        let message = Message::new(id, "c1", Role::Assistant, id, 0);
        if changes.is_empty() {
            message
        } else {
            message.with_metadata(ModelMetadata {
                file_changes: changes,
                ..Default::default()
            })
        }
    }

    fn record() -> ChatHistoryRecord {
        let mut record = ChatHistoryRecord::new("c1", 0);
        record.messages = vec![
            msg("m1", vec![FileChange::write("index.html", "v1")]),
            msg("m2", vec![FileChange::write("style.css", "a")]),
            msg("m3", vec![FileChange::write("index.html", "v3")]),
            msg("m4", vec![FileChange::delete("style.css")]),
            msg("m5", vec![FileChange::write("index.html", "v5")]),
        ];
        record
    }

    fn snapshot(anchor: &str, files: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            chat_id: "c1".into(),
            anchor_message_id: anchor.into(),
            file_state: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            summary: None,
            created_at: 0,
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_rewind_without_snapshot_replays_from_start() {
        let result = compute_rewind(&record(), &[], "m3").unwrap();
        assert_eq!(result.anchor_message_id, None);
        assert_eq!(ids(&result.messages), vec!["m1", "m2", "m3"]);
        assert_eq!(ids(&result.archived), vec!["m4", "m5"]);
        assert_eq!(result.file_state["index.html"], "v3");
        assert_eq!(result.file_state["style.css"], "a");
    }

    #[test]
    fn test_rewind_uses_latest_snapshot_before_target() {
        let snapshots = vec![
            snapshot("m1", &[("index.html", "v1")]),
            snapshot("m2", &[("index.html", "v1"), ("style.css", "a")]),
            snapshot("m5", &[("index.html", "v5")]),
        ];
        let result = compute_rewind(&record(), &snapshots, "m4").unwrap();
        assert_eq!(result.anchor_message_id.as_deref(), Some("m2"));
        assert_eq!(ids(&result.messages), vec!["m2", "m3", "m4"]);
        assert_eq!(ids(&result.archived), vec!["m1", "m5"]);
        assert_eq!(result.file_state.len(), 1);
        assert_eq!(result.file_state["index.html"], "v3");
    }

    #[test]
    fn test_rewind_to_anchor_reproduces_snapshot_state() {
        // Deliberately different from what replaying would give.
        let snapshots = vec![snapshot("m3", &[("only.txt", "x")])];
        let result = compute_rewind(&record(), &snapshots, "m3").unwrap();
        assert_eq!(result.file_state, snapshots[0].file_state);
        assert_eq!(ids(&result.messages), vec!["m3"]);
    }

    #[test]
    fn test_later_snapshot_wins_on_same_anchor() {
        let snapshots = vec![
            snapshot("m2", &[("a", "old")]),
            snapshot("m2", &[("a", "new")]),
        ];
        let result = compute_rewind(&record(), &snapshots, "m2").unwrap();
        assert_eq!(result.file_state["a"], "new");
    }

    #[test]
    fn test_rewind_is_idempotent() {
        let snapshots = vec![snapshot("m2", &[("index.html", "v1"), ("style.css", "a")])];
        let first = compute_rewind(&record(), &snapshots, "m4").unwrap();

        let mut applied = record();
        applied.messages = first.messages.clone();
        applied.archived = first.archived.clone();

        let second = compute_rewind(&applied, &snapshots, "m4").unwrap();
        assert_eq!(second.messages, first.messages);
        assert_eq!(second.file_state, first.file_state);
        assert!(second.archived.is_empty());
    }

    #[test]
    fn test_unknown_target_fails() {
        let err = compute_rewind(&record(), &[], "nope").unwrap_err();
        assert!(matches!(err, SnapshotError::MessageNotFound { .. }));
    }

    #[test]
    fn test_replay_file_state() {
        let state = replay_file_state(&record(), &[], 4);
        assert_eq!(state.len(), 1);
        assert_eq!(state["index.html"], "v5");
    }
}
