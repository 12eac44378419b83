mod common;

use std::sync::Arc;

use common::{BarrierRemote, Client, FlakyRemote, Server, sync_config};
use tether::local::{LocalStore, SqliteKvStore};
use tether::remote::RemoteStore;
use tether::session::SessionOptions;
use tether::sync::{SessionIdentity, StaticIdentity, SyncEvent, SyncOp, SyncOpKind};
use tether_protocol::{Message, Role};
use tokio::sync::Barrier;

const USER: &str = "usr_alice";

async fn client(server: &Server) -> Client {
    Client::new(
        Arc::new(server.remote.clone()),
        Arc::new(StaticIdentity::new(USER)),
        sync_config(),
        server.shared_clock(),
    )
}

#[tokio::test]
async fn offline_messages_reach_remote_exactly_once() {
    let server = Server::new().await;
    let client = client(&server).await;
    client.sync.set_online(false);

    for (id, text) in [("m1", "hello"), ("m2", "world")] {
        client
            .chat
            .save_chat_message(Some(id), "c1", Role::User, text, None)
            .await
            .unwrap();
    }
    let report = client.sync.process_queue().await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(client.sync.queue().len().await.unwrap(), 2);
    assert!(server.remote.find_project_by_chat("c1").await.unwrap().is_none());

    client.sync.set_online(true);
    let report = client.sync.process_queue().await.unwrap();
    assert_eq!(report.applied, 2);
    assert!(client.sync.queue().is_empty().await.unwrap());

    // Replaying the chat queues nothing: both ids are confirmed.
    assert_eq!(client.sync.sync_chat("c1").await.unwrap(), 0);
    client.sync.process_queue().await.unwrap();

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    assert_eq!(server.remote.count_messages(&project.id).await.unwrap(), 2);
    assert!(!client.local.is_dirty("c1").await.unwrap());
}

#[tokio::test]
async fn resent_entry_creates_no_second_row() {
    let server = Server::new().await;
    let client = client(&server).await;

    let message = Message::new("m1", "c1", Role::User, "hi", 1);
    for _ in 0..2 {
        // Queued again after being applied, as after a lost response.
        client
            .sync
            .queue()
            .push(
                SyncOp::UpsertMessage {
                    chat_id: "c1".into(),
                    message: message.clone(),
                },
                1,
            )
            .await
            .unwrap();
        client.sync.process_queue().await.unwrap();
    }

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    assert_eq!(server.remote.count_messages(&project.id).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_first_syncs_share_one_project() {
    let server = Server::new().await;
    let barrier = Arc::new(Barrier::new(2));

    let clients: Vec<Client> = (0..2)
        .map(|_| {
            Client::new(
                Arc::new(BarrierRemote::new(server.remote.clone(), barrier.clone())),
                Arc::new(StaticIdentity::new(USER)),
                sync_config(),
                server.shared_clock(),
            )
        })
        .collect();

    for (i, client) in clients.iter().enumerate() {
        let id = format!("m{i}");
        client
            .chat
            .save_chat_message(Some(id.as_str()), "shared", Role::User, "hi", None)
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(
        clients[0].sync.process_queue(),
        clients[1].sync.process_queue()
    );
    assert_eq!(a.unwrap().applied, 1);
    assert_eq!(b.unwrap().applied, 1);

    assert_eq!(
        server.remote.count_projects_for_chat("shared").await.unwrap(),
        1
    );
    let project = server
        .remote
        .find_project_by_chat("shared")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.remote.count_messages(&project.id).await.unwrap(), 2);
}

#[tokio::test]
async fn exhausted_retries_emit_sync_failed() {
    let server = Server::new().await;
    let flaky = Arc::new(FlakyRemote::new(server.remote.clone()));
    let client = Client::new(
        flaky.clone(),
        Arc::new(StaticIdentity::new(USER)),
        sync_config(),
        server.shared_clock(),
    );
    let mut events = client.sync.subscribe();

    client
        .chat
        .save_chat_message(Some("m1"), "c1", Role::User, "hi", None)
        .await
        .unwrap();

    for attempt in 1..=3 {
        let report = client.sync.process_queue().await.unwrap();
        assert_eq!(report.failed, 1, "attempt {attempt}");
    }
    assert!(client.sync.queue().is_empty().await.unwrap());

    let event = events.recv().await.unwrap();
    match &event {
        SyncEvent::Failed { kind, chat_id, .. } => {
            assert_eq!(*kind, SyncOpKind::UpsertMessage);
            assert_eq!(chat_id, "c1");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(event.code(), Some("SYNC_FAILED"));

    let status = client.sync.status().await.unwrap();
    assert_eq!(status.pending, 0);
    assert!(status.last_error.is_some());

    // The message is still local and goes out once the remote recovers.
    flaky.set_failing(false);
    assert_eq!(client.sync.sync_chat("c1").await.unwrap(), 1);
    assert_eq!(client.sync.process_queue().await.unwrap().applied, 1);
}

#[tokio::test]
async fn retries_wait_for_backoff() {
    let server = Server::new().await;
    let flaky = Arc::new(FlakyRemote::new(server.remote.clone()));
    let mut config = sync_config();
    config.base_delay_ms = 1_000;
    config.max_delay_ms = 60_000;
    let client = Client::new(
        flaky.clone(),
        Arc::new(StaticIdentity::new(USER)),
        config,
        server.shared_clock(),
    );

    client
        .chat
        .save_chat_message(Some("m1"), "c1", Role::User, "hi", None)
        .await
        .unwrap();
    assert_eq!(client.sync.process_queue().await.unwrap().failed, 1);

    flaky.set_failing(false);
    let report = client.sync.process_queue().await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.deferred, 1);

    server.clock.advance(chrono::Duration::seconds(2));
    assert_eq!(client.sync.process_queue().await.unwrap().applied, 1);
}

#[tokio::test]
async fn queue_waits_for_a_live_session() {
    let server = Server::new().await;
    let signed_in = server
        .auth
        .register("alice@example.com", common::TEST_PASSWORD, "Alice", SessionOptions::default())
        .await
        .unwrap();

    let identity = Arc::new(SessionIdentity::new(server.sessions.clone()));
    let client = Client::new(
        Arc::new(server.remote.clone()),
        identity.clone(),
        sync_config(),
        server.shared_clock(),
    );

    client
        .chat
        .save_chat_message(Some("m1"), "c1", Role::User, "hi", None)
        .await
        .unwrap();
    assert_eq!(client.sync.process_queue().await.unwrap().applied, 0);
    assert_eq!(client.sync.queue().len().await.unwrap(), 1);

    identity.set_session(signed_in.session.id.clone()).await;
    server.auth.logout(&signed_in.session.id).await.unwrap();
    assert_eq!(client.sync.process_queue().await.unwrap().applied, 0);

    let again = server
        .auth
        .login("alice@example.com", common::TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap();
    identity.set_session(again.session.id).await;
    assert_eq!(client.sync.process_queue().await.unwrap().applied, 1);

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    assert_eq!(project.user_id, signed_in.user.id);
}

#[tokio::test]
async fn foreign_project_is_not_written() {
    let server = Server::new().await;
    let owner = client(&server).await;
    owner
        .chat
        .save_chat_message(Some("m1"), "c1", Role::User, "mine", None)
        .await
        .unwrap();
    owner.sync.process_queue().await.unwrap();

    let intruder = Client::new(
        Arc::new(server.remote.clone()),
        Arc::new(StaticIdentity::new("usr_mallory")),
        sync_config(),
        server.shared_clock(),
    );
    let mut events = intruder.sync.subscribe();
    intruder
        .chat
        .save_chat_message(Some("m2"), "c1", Role::User, "not mine", None)
        .await
        .unwrap();
    let report = intruder.sync.process_queue().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(events.recv().await.unwrap().code(), Some("UNAUTHORIZED"));

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    assert_eq!(server.remote.count_messages(&project.id).await.unwrap(), 1);
}

#[tokio::test]
async fn queued_writes_survive_restart() {
    let server = Server::new().await;
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("local.db");

    {
        let kv = SqliteKvStore::open(&path).await.unwrap();
        let client = Client::with_local(
            LocalStore::new(Arc::new(kv.clone())),
            Arc::new(server.remote.clone()),
            Arc::new(StaticIdentity::new(USER)),
            sync_config(),
            server.shared_clock(),
        );
        client.sync.set_online(false);
        client
            .chat
            .save_chat_message(Some("m1"), "c1", Role::User, "before restart", None)
            .await
            .unwrap();
        client.chat.save_file("c1", "app.js", Some("1")).await.unwrap();
        kv.close().await;
    }

    let kv = SqliteKvStore::open(&path).await.unwrap();
    let client = Client::with_local(
        LocalStore::new(Arc::new(kv)),
        Arc::new(server.remote.clone()),
        Arc::new(StaticIdentity::new(USER)),
        sync_config(),
        server.shared_clock(),
    );
    assert_eq!(client.sync.queue().len().await.unwrap(), 2);
    assert_eq!(client.sync.process_queue().await.unwrap().applied, 2);

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    let files = server.remote.load_files(&project.id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].content.as_deref(), Some("1"));
}

#[tokio::test]
async fn replaced_payload_is_sent_last_value_wins() {
    let server = Server::new().await;
    let client = client(&server).await;

    client.chat.save_file("c1", "index.html", Some("v1")).await.unwrap();
    client.chat.save_file("c1", "index.html", Some("v2")).await.unwrap();
    assert_eq!(client.sync.queue().len().await.unwrap(), 1);
    client.sync.process_queue().await.unwrap();

    let project = server.remote.find_project_by_chat("c1").await.unwrap().unwrap();
    let files = server.remote.load_files(&project.id).await.unwrap();
    assert_eq!(files[0].content.as_deref(), Some("v2"));
}
