mod common;

use std::sync::Arc;

use common::{Client, Server, sync_config};
use tether::remote::RemoteStore;
use tether::snapshot::compute_rewind;
use tether::sync::StaticIdentity;
use tether_protocol::{FileChange, FileState, ModelMetadata, Role};

fn writes(changes: Vec<FileChange>) -> Option<ModelMetadata> {
    Some(ModelMetadata {
        file_changes: changes,
        ..Default::default()
    })
}

async fn seeded(server: &Server) -> Client {
    let client = Client::new(
        Arc::new(server.remote.clone()),
        Arc::new(StaticIdentity::new("usr_alice")),
        sync_config(),
        server.shared_clock(),
    );
    let steps = [
        ("m1", vec![FileChange::write("index.html", "v1")]),
        ("m2", vec![FileChange::write("app.js", "a")]),
        ("m3", vec![FileChange::write("index.html", "v3")]),
        ("m4", vec![FileChange::delete("app.js")]),
    ];
    for (id, changes) in steps {
        client
            .chat
            .save_chat_message(Some(id), "c1", Role::Assistant, id, writes(changes))
            .await
            .unwrap();
    }
    client
}

#[tokio::test]
async fn rewind_is_deterministic_and_idempotent() {
    let server = Server::new().await;
    let client = seeded(&server).await;
    let at_m2: FileState = [("index.html", "v1"), ("app.js", "a")]
        .into_iter()
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect();
    client
        .chat
        .snapshots()
        .take_snapshot("c1", "m2", at_m2, None)
        .await
        .unwrap();

    let preview = client.chat.snapshots().rewind("c1", "m3").await.unwrap();
    let first = client.chat.rewind_to("c1", "m3").await.unwrap();
    assert_eq!(preview, first);
    assert_eq!(first.anchor_message_id.as_deref(), Some("m2"));
    let archived: Vec<&str> = first.archived.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(archived, vec!["m1", "m4"]);
    assert_eq!(first.file_state.get("index.html").map(String::as_str), Some("v3"));
    assert_eq!(first.file_state.get("app.js").map(String::as_str), Some("a"));

    // Rewinding again to the same target changes nothing.
    let second = client.chat.rewind_to("c1", "m3").await.unwrap();
    assert_eq!(second.messages, first.messages);
    assert_eq!(second.file_state, first.file_state);
    assert!(second.archived.is_empty());

    let record = client.local.get_chat("c1").await.unwrap().unwrap();
    let snapshots = client.chat.snapshots().list_snapshots("c1").await.unwrap();
    let recomputed = compute_rewind(&record, &snapshots, "m3").unwrap();
    assert_eq!(recomputed.file_state, first.file_state);
}

#[tokio::test]
async fn rewound_chat_loads_the_same_everywhere() {
    let server = Server::new().await;
    let client = seeded(&server).await;
    client.sync.process_queue().await.unwrap();

    let result = client.chat.rewind_to("c1", "m2").await.unwrap();
    let archived: Vec<&str> = result.archived.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(archived, vec!["m3", "m4"]);
    client.sync.process_queue().await.unwrap();
    assert!(client.sync.queue().is_empty().await.unwrap());

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    assert_eq!(project.rewound_to.as_deref(), Some("m2"));

    // A second device with an empty local store sees the rewound history.
    let other = Client::new(
        Arc::new(server.remote.clone()),
        Arc::new(StaticIdentity::new("usr_alice")),
        sync_config(),
        server.shared_clock(),
    );
    let record = other.chat.load_chat("c1").await.unwrap().unwrap();
    let ids: Vec<&str> = record.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(record.metadata.rewound_to.as_deref(), Some("m2"));

    let workspace = other.local.get_workspace("c1").await.unwrap();
    assert_eq!(workspace.get("index.html").map(String::as_str), Some("v1"));
    assert_eq!(workspace.get("app.js").map(String::as_str), Some("a"));
}

#[tokio::test]
async fn messages_after_rewind_continue_the_history() {
    let server = Server::new().await;
    let client = seeded(&server).await;

    client.chat.rewind_to("c1", "m1").await.unwrap();
    client
        .chat
        .save_chat_message(Some("m5"), "c1", Role::User, "try again", None)
        .await
        .unwrap();

    // Archived ids are known, so saving one again is a no-op.
    let old = client
        .chat
        .save_chat_message(Some("m3"), "c1", Role::Assistant, "replay", None)
        .await
        .unwrap();
    assert_eq!(old.content, "m3");

    let record = client.local.get_chat("c1").await.unwrap().unwrap();
    let ids: Vec<&str> = record.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m5"]);
    assert_eq!(record.archived.len(), 3);
}
