//! Sync engine - drains the durable queue into the remote store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::BackoffPolicy;
use super::dedup::{DedupStore, ProjectRef};
use super::events::{DrainReport, SyncEvent, SyncStatus};
use super::identity::SyncIdentity;
use super::ops::{SyncOp, SyncQueueEntry};
use super::queue::SyncQueue;
use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult};
use crate::local::{KeyedLocks, LocalStore, StoreError};
use crate::remote::{NewProject, ProjectUpdate, RemoteError, RemoteStore};

/// Sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts before an entry is dropped.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// Start a drain in the background after enqueue and on reconnect.
    pub auto_drain: bool,
    /// Entries attempted per pass before yielding to a fresh pass.
    pub batch_size: usize,
    /// Capacity of the event broadcast channel.
    pub event_buffer_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ms: 250,
            auto_drain: true,
            batch_size: 100,
            event_buffer_size: 256,
        }
    }
}

impl SyncConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.base_delay_ms),
            max: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

/// Why a single entry could not be applied.
#[derive(Debug)]
enum ApplyError {
    /// Try again later.
    Retryable(String),
    /// Retrying cannot help; drop now.
    Permanent(CoreError),
    /// The local store failed. Aborts the pass.
    Local(StoreError),
}

impl From<RemoteError> for ApplyError {
    fn from(err: RemoteError) -> Self {
        Self::Retryable(err.to_string())
    }
}

impl From<StoreError> for ApplyError {
    fn from(err: StoreError) -> Self {
        Self::Local(err)
    }
}

/// Releases the in-flight flag when a drain ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Inner {
    local: LocalStore,
    queue: SyncQueue,
    remote: Arc<dyn RemoteStore>,
    dedup: Arc<dyn DedupStore>,
    identity: Arc<dyn SyncIdentity>,
    config: SyncConfig,
    backoff: BackoffPolicy,
    clock: SharedClock,
    online: AtomicBool,
    in_flight: AtomicBool,
    rerun: AtomicBool,
    project_locks: KeyedLocks,
    events: broadcast::Sender<SyncEvent>,
    last_error: StdMutex<Option<String>>,
}

/// Offline-capable writer to the remote store. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("online", &self.is_online())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine. It starts online.
    pub fn new(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        dedup: Arc<dyn DedupStore>,
        identity: Arc<dyn SyncIdentity>,
        config: SyncConfig,
        clock: SharedClock,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer_size.max(1));
        Self {
            inner: Arc::new(Inner {
                queue: SyncQueue::new(local.clone()),
                local,
                remote,
                dedup,
                identity,
                backoff: config.backoff(),
                config,
                clock,
                online: AtomicBool::new(true),
                in_flight: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                project_locks: KeyedLocks::new(),
                events,
                last_error: StdMutex::new(None),
            }),
        }
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    pub fn local(&self) -> &LocalStore {
        &self.inner.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    pub fn dedup(&self) -> &Arc<dyn DedupStore> {
        &self.inner.dedup
    }

    /// User the engine currently writes as.
    pub async fn current_user(&self) -> Option<String> {
        self.inner.identity.current_user().await
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn set_last_error(&self, error: Option<String>) {
        let mut last = self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last = error;
    }

    pub async fn status(&self) -> CoreResult<SyncStatus> {
        let last_error = self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(SyncStatus {
            online: self.is_online(),
            pending: self.inner.queue.len().await?,
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            last_error,
        })
    }

    // ========== Queueing ==========

    /// Persist an op and, when online, start draining in the background.
    #[instrument(skip(self, op), fields(key = %op.natural_key()))]
    pub async fn enqueue(&self, op: SyncOp) -> CoreResult<SyncQueueEntry> {
        let entry = self.inner.queue.push(op, self.inner.clock.now_ms()).await?;
        self.kick();
        Ok(entry)
    }

    /// Queue every active message of a chat the remote has not confirmed.
    /// Returns how many were queued.
    #[instrument(skip(self))]
    pub async fn sync_chat(&self, chat_id: &str) -> CoreResult<usize> {
        let Some(record) = self.inner.local.get_chat(chat_id).await? else {
            return Ok(0);
        };
        let confirmed = self.inner.dedup.confirmed_ids(chat_id).await?;
        let now = self.inner.clock.now_ms();

        let mut queued = 0;
        for message in record.messages.iter().filter(|m| !confirmed.contains(&m.id)) {
            self.inner
                .queue
                .push(
                    SyncOp::UpsertMessage {
                        chat_id: chat_id.to_string(),
                        message: message.clone(),
                    },
                    now,
                )
                .await?;
            queued += 1;
        }

        if queued > 0 {
            debug!(queued, "Queued unconfirmed messages");
            self.kick();
        }
        Ok(queued)
    }

    fn kick(&self) {
        if !self.inner.config.auto_drain || !self.is_online() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.process_queue().await {
                error!("Background sync drain failed: {}", e);
            }
        });
    }

    // ========== Connectivity ==========

    /// Going online starts a drain; going offline only flips the flag.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, "Connectivity changed");
            self.emit(SyncEvent::Connectivity { online });
        }
        if online {
            self.kick();
        }
    }

    /// Follow a connectivity channel until its sender is dropped.
    pub fn spawn_connectivity_watcher(&self, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let online = *rx.borrow_and_update();
                engine.set_online(online);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    // ========== Draining ==========

    /// Drain the queue.
    ///
    /// Single-flight: a call made while a drain is running returns at once
    /// with `skipped` set, and the running drain does one more pass so
    /// nothing enqueued meanwhile is left behind.
    pub async fn process_queue(&self) -> CoreResult<DrainReport> {
        let mut report = DrainReport::default();
        loop {
            if self.inner.in_flight.swap(true, Ordering::SeqCst) {
                self.inner.rerun.store(true, Ordering::SeqCst);
                // The running drain may have released the flag in between.
                if self.inner.in_flight.load(Ordering::SeqCst) {
                    report.skipped = true;
                    return Ok(report);
                }
                continue;
            }

            {
                let _guard = InFlightGuard(&self.inner.in_flight);
                loop {
                    self.inner.rerun.store(false, Ordering::SeqCst);
                    self.drain_pass(&mut report).await?;
                    if !self.inner.rerun.swap(false, Ordering::SeqCst) {
                        break;
                    }
                }
            }

            if !self.inner.rerun.load(Ordering::SeqCst) {
                return Ok(report);
            }
        }
    }

    async fn drain_pass(&self, report: &mut DrainReport) -> CoreResult<()> {
        if !self.is_online() {
            return Ok(());
        }
        let Some(user_id) = self.inner.identity.current_user().await else {
            debug!("No signed-in user, leaving queue untouched");
            return Ok(());
        };

        let entries = self.inner.queue.entries().await?;
        let now = self.inner.clock.now_ms();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut attempted = 0;

        for entry in entries {
            let chat_id = entry.op.chat_id().to_string();
            if blocked.contains(&chat_id) || !entry.is_due(now) {
                // Later entries of this chat wait behind this one.
                blocked.insert(chat_id);
                report.deferred += 1;
                continue;
            }
            if !self.is_online() {
                break;
            }
            if attempted >= self.inner.config.batch_size {
                self.inner.rerun.store(true, Ordering::SeqCst);
                break;
            }
            attempted += 1;

            match self.apply(&user_id, &entry).await {
                Ok(()) => {
                    self.on_applied(&entry).await?;
                    report.applied += 1;
                }
                Err(ApplyError::Local(e)) => return Err(e.into()),
                Err(ApplyError::Permanent(error)) => {
                    blocked.insert(chat_id);
                    report.failed += 1;
                    report.dropped += 1;
                    self.drop_entry(&entry, error).await?;
                }
                Err(ApplyError::Retryable(reason)) => {
                    blocked.insert(chat_id);
                    report.failed += 1;
                    if self.on_retryable(&entry, reason).await? {
                        report.dropped += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply(&self, user_id: &str, entry: &SyncQueueEntry) -> Result<(), ApplyError> {
        let project = self.ensure_project(user_id, &entry.op).await?;
        if project.user_id != user_id {
            return Err(ApplyError::Permanent(CoreError::unauthorized(format!(
                "project {} belongs to another user",
                project.project_id
            ))));
        }

        let remote = &self.inner.remote;
        match &entry.op {
            SyncOp::UpsertMessage { message, .. } => {
                remote.upsert_message(&project.project_id, message).await?
            }
            SyncOp::UpsertProject {
                description,
                url_slug,
                metadata,
                rewound_to,
                archived_message_ids,
                ..
            } => {
                let update = ProjectUpdate {
                    description: description.clone(),
                    url_slug: url_slug.clone(),
                    metadata: metadata.clone(),
                    rewound_to: rewound_to.clone(),
                    archived_message_ids: archived_message_ids.clone(),
                };
                remote.update_project(&project.project_id, &update).await?
            }
            SyncOp::UpsertFile { path, content, .. } => {
                remote
                    .upsert_file(&project.project_id, path, content.as_deref())
                    .await?
            }
            SyncOp::UpsertCanvas {
                screen_name, html, ..
            } => {
                remote
                    .upsert_canvas(&project.project_id, screen_name, html)
                    .await?
            }
        }
        Ok(())
    }

    /// Resolve the canonical project of a chat: cache, then remote lookup,
    /// then create. A create rejected by the unique constraint means another
    /// writer got there first; its project is adopted.
    async fn ensure_project(&self, user_id: &str, op: &SyncOp) -> Result<ProjectRef, ApplyError> {
        let chat_id = op.chat_id();
        if let Some(project) = self.inner.dedup.project(chat_id).await? {
            return Ok(project);
        }

        let _guard = self.inner.project_locks.lock(chat_id).await;
        if let Some(project) = self.inner.dedup.project(chat_id).await? {
            return Ok(project);
        }

        let remote = &self.inner.remote;
        let record = match remote.find_project_by_chat(chat_id).await? {
            Some(existing) => existing,
            None => {
                let new_project = self.new_project(chat_id, user_id, op).await?;
                match remote.create_project(new_project).await {
                    Ok(created) => {
                        info!(project_id = %created.id, chat_id, "Created remote project");
                        created
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(chat_id, "Project created concurrently, adopting it");
                        remote.find_project_by_chat(chat_id).await?.ok_or_else(|| {
                            ApplyError::Retryable(format!(
                                "project for chat {chat_id} missing after conflict"
                            ))
                        })?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let project = ProjectRef {
            project_id: record.id,
            user_id: record.user_id,
        };
        self.inner.dedup.set_project(chat_id, &project).await?;
        Ok(project)
    }

    async fn new_project(
        &self,
        chat_id: &str,
        user_id: &str,
        op: &SyncOp,
    ) -> Result<NewProject, ApplyError> {
        if let SyncOp::UpsertProject {
            description,
            url_slug,
            metadata,
            ..
        } = op
        {
            return Ok(NewProject {
                local_chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
                description: description.clone(),
                url_slug: url_slug.clone(),
                metadata: metadata.clone(),
            });
        }

        let record = self.inner.local.get_chat(chat_id).await?;
        Ok(NewProject {
            local_chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            description: record
                .as_ref()
                .map(|r| r.description.clone())
                .unwrap_or_default(),
            url_slug: record.and_then(|r| r.url_slug),
            metadata: json!({}),
        })
    }

    async fn on_applied(&self, entry: &SyncQueueEntry) -> CoreResult<()> {
        let chat_id = entry.op.chat_id();
        if let SyncOp::UpsertMessage { message, .. } = &entry.op {
            self.inner.dedup.confirm(chat_id, &message.id).await?;
        }
        // A replaced payload stays queued and goes out next pass.
        self.inner.queue.remove_if_unchanged(entry).await?;

        if !self.inner.queue.has_pending_for_chat(chat_id).await? {
            self.inner.local.clear_dirty(chat_id).await?;
        }

        debug!(op_id = %entry.op_id, key = %entry.key, "Applied op");
        self.emit(SyncEvent::Applied {
            op_id: entry.op_id.clone(),
            key: entry.key.clone(),
            kind: entry.kind(),
            chat_id: chat_id.to_string(),
        });
        Ok(())
    }

    /// Schedule a retry, or drop the entry once it is out of attempts.
    /// Returns true when dropped.
    async fn on_retryable(&self, entry: &SyncQueueEntry, reason: String) -> CoreResult<bool> {
        let attempts = entry.retry_count + 1;
        self.set_last_error(Some(reason.clone()));

        if attempts >= self.inner.config.max_retries {
            let error = CoreError::SyncFailed {
                op_id: entry.op_id.clone(),
                reason,
            };
            self.drop_entry(entry, error).await?;
            return Ok(true);
        }

        let delay = self.inner.backoff.delay(attempts);
        let mut updated = entry.clone();
        updated.retry_count = attempts;
        updated.next_attempt_at = Some(self.inner.clock.now_ms() + delay.as_millis() as i64);
        updated.last_error = Some(reason);
        self.inner.queue.update_if_unchanged(&updated).await?;

        warn!(
            op_id = %entry.op_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Sync op failed, will retry"
        );
        Ok(false)
    }

    async fn drop_entry(&self, entry: &SyncQueueEntry, error: CoreError) -> CoreResult<()> {
        error!(
            op_id = %entry.op_id,
            key = %entry.key,
            code = error.code(),
            "Dropping sync op: {}",
            error
        );
        self.set_last_error(Some(error.to_string()));
        self.inner.queue.remove_if_unchanged(entry).await?;
        self.emit(SyncEvent::Failed {
            op_id: entry.op_id.clone(),
            key: entry.key.clone(),
            kind: entry.kind(),
            chat_id: entry.op.chat_id().to_string(),
            error,
        });
        Ok(())
    }
}
