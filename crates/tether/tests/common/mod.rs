//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tether::auth::{AuthConfig, AuthService};
use tether::chat::ChatService;
use tether::clock::{ManualClock, SharedClock};
use tether::db::Database;
use tether::local::LocalStore;
use tether::remote::{
    NewProject, ProjectRecord, ProjectUpdate, RemoteFile, RemoteResult, RemoteStore,
    SqliteRemoteStore,
};
use tether::session::{LoginRateLimiter, RateLimitConfig, SessionConfig, SessionManager};
use tether::snapshot::{SnapshotConfig, SnapshotEngine};
use tether::sync::{LocalDedupStore, SyncConfig, SyncEngine, SyncIdentity};
use tether::user::UserRepository;
use tether_protocol::Message;
use tokio::sync::Barrier;

pub const TEST_PASSWORD: &str = "correct-horse-1";

pub fn manual_clock() -> ManualClock {
    ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap())
}

/// Sync settings for deterministic tests: drains only run when called and
/// retries are not delayed.
pub fn sync_config() -> SyncConfig {
    SyncConfig {
        auto_drain: false,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter_ms: 0,
        ..Default::default()
    }
}

/// Like [`sync_config`], but enqueue and reconnect start background drains.
pub fn auto_sync_config() -> SyncConfig {
    SyncConfig {
        auto_drain: true,
        ..sync_config()
    }
}

/// Poll until `check` holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Server side: users, sessions and the remote project tables.
pub struct Server {
    pub db: Database,
    pub remote: SqliteRemoteStore,
    pub sessions: SessionManager,
    pub auth: AuthService,
    pub clock: ManualClock,
}

impl Server {
    pub async fn new() -> Self {
        let clock = manual_clock();
        let shared: SharedClock = Arc::new(clock.clone());
        let db = Database::in_memory().await.unwrap();
        let sessions =
            SessionManager::new(db.pool().clone(), SessionConfig::default(), shared.clone());
        let auth = AuthService::new(
            UserRepository::new(db.pool().clone()),
            sessions.clone(),
            LoginRateLimiter::in_memory(RateLimitConfig::default(), shared),
            AuthConfig::for_testing(),
        );
        Self {
            remote: SqliteRemoteStore::new(db.clone()),
            db,
            sessions,
            auth,
            clock,
        }
    }

    pub fn shared_clock(&self) -> SharedClock {
        Arc::new(self.clock.clone())
    }
}

/// One client: its own local store, queue and dedup cache.
pub struct Client {
    pub local: LocalStore,
    pub sync: SyncEngine,
    pub chat: ChatService,
}

impl Client {
    /// Queue empty and no drain running.
    pub async fn is_drained(&self) -> bool {
        let status = self.sync.status().await.unwrap();
        status.pending == 0 && !status.in_flight
    }

    pub fn new(
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn SyncIdentity>,
        config: SyncConfig,
        clock: SharedClock,
    ) -> Self {
        Self::with_local(LocalStore::in_memory(), remote, identity, config, clock)
    }

    pub fn with_local(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn SyncIdentity>,
        config: SyncConfig,
        clock: SharedClock,
    ) -> Self {
        let sync = SyncEngine::new(
            local.clone(),
            remote,
            Arc::new(LocalDedupStore::new(local.clone())),
            identity,
            config,
            clock.clone(),
        );
        let snapshots = SnapshotEngine::new(local.clone(), SnapshotConfig::default(), clock.clone());
        let chat = ChatService::new(local.clone(), sync.clone(), snapshots, clock);
        Self { local, sync, chat }
    }
}

/// Holds its first project lookup until every participant has made one,
/// so concurrent first syncs all see "no project yet".
pub struct BarrierRemote {
    inner: SqliteRemoteStore,
    barrier: Arc<Barrier>,
    gated: AtomicBool,
}

impl BarrierRemote {
    pub fn new(inner: SqliteRemoteStore, barrier: Arc<Barrier>) -> Self {
        Self {
            inner,
            barrier,
            gated: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RemoteStore for BarrierRemote {
    async fn find_project_by_chat(&self, local_chat_id: &str) -> RemoteResult<Option<ProjectRecord>> {
        let found = self.inner.find_project_by_chat(local_chat_id).await?;
        if self.gated.swap(false, Ordering::SeqCst) {
            self.barrier.wait().await;
        }
        Ok(found)
    }

    async fn get_project(&self, project_id: &str) -> RemoteResult<Option<ProjectRecord>> {
        self.inner.get_project(project_id).await
    }

    async fn create_project(&self, project: NewProject) -> RemoteResult<ProjectRecord> {
        self.inner.create_project(project).await
    }

    async fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> RemoteResult<()> {
        self.inner.update_project(project_id, update).await
    }

    async fn upsert_message(&self, project_id: &str, message: &Message) -> RemoteResult<()> {
        self.inner.upsert_message(project_id, message).await
    }

    async fn upsert_file(
        &self,
        project_id: &str,
        path: &str,
        content: Option<&str>,
    ) -> RemoteResult<()> {
        self.inner.upsert_file(project_id, path, content).await
    }

    async fn upsert_canvas(&self, project_id: &str, screen_name: &str, html: &str) -> RemoteResult<()> {
        self.inner.upsert_canvas(project_id, screen_name, html).await
    }

    async fn load_messages(&self, project_id: &str, chat_id: &str) -> RemoteResult<Vec<Message>> {
        self.inner.load_messages(project_id, chat_id).await
    }

    async fn load_files(&self, project_id: &str) -> RemoteResult<Vec<RemoteFile>> {
        self.inner.load_files(project_id).await
    }
}

/// Fails every call until switched off.
pub struct FlakyRemote {
    inner: SqliteRemoteStore,
    failing: AtomicBool,
}

impl FlakyRemote {
    pub fn new(inner: SqliteRemoteStore) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> RemoteResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(tether::remote::RemoteError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn find_project_by_chat(&self, local_chat_id: &str) -> RemoteResult<Option<ProjectRecord>> {
        self.check()?;
        self.inner.find_project_by_chat(local_chat_id).await
    }

    async fn get_project(&self, project_id: &str) -> RemoteResult<Option<ProjectRecord>> {
        self.check()?;
        self.inner.get_project(project_id).await
    }

    async fn create_project(&self, project: NewProject) -> RemoteResult<ProjectRecord> {
        self.check()?;
        self.inner.create_project(project).await
    }

    async fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> RemoteResult<()> {
        self.check()?;
        self.inner.update_project(project_id, update).await
    }

    async fn upsert_message(&self, project_id: &str, message: &Message) -> RemoteResult<()> {
        self.check()?;
        self.inner.upsert_message(project_id, message).await
    }

    async fn upsert_file(
        &self,
        project_id: &str,
        path: &str,
        content: Option<&str>,
    ) -> RemoteResult<()> {
        self.check()?;
        self.inner.upsert_file(project_id, path, content).await
    }

    async fn upsert_canvas(&self, project_id: &str, screen_name: &str, html: &str) -> RemoteResult<()> {
        self.check()?;
        self.inner.upsert_canvas(project_id, screen_name, html).await
    }

    async fn load_messages(&self, project_id: &str, chat_id: &str) -> RemoteResult<Vec<Message>> {
        self.check()?;
        self.inner.load_messages(project_id, chat_id).await
    }

    async fn load_files(&self, project_id: &str) -> RemoteResult<Vec<RemoteFile>> {
        self.check()?;
        self.inner.load_files(project_id).await
    }
}
