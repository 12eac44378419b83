//! Login rate limiting.
//!
//! Failed attempts are counted per normalized identifier inside a sliding
//! window measured from the last failure. Once the count reaches the limit,
//! further attempts are rejected before credentials are looked at.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult};

/// Failure counter for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Storage for attempt counters.
///
/// The default store is process-local. A deployment with several server
/// processes plugs in a shared one.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>>;

    /// Count one failure. A record older than `window` starts over at 1.
    async fn increment(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptRecord>;

    async fn reset(&self, key: &str) -> Result<()>;
}

/// Stale records are swept once per this many increments.
const PRUNE_EVERY: u64 = 256;

/// Process-wide in-memory counters. Records whose window has passed are
/// pruned as failures come in, so the map stays bounded by recent traffic.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    records: DashMap<String, AttemptRecord>,
    increments: AtomicU64,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records whose window has passed.
    pub fn prune(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now - record.last_attempt < window);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>> {
        Ok(self.records.get(key).map(|r| *r))
    }

    async fn increment(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptRecord> {
        let record = {
            let mut entry = self.records.entry(key.to_string()).or_insert(AttemptRecord {
                attempts: 0,
                last_attempt: now,
            });
            if now - entry.last_attempt >= window {
                entry.attempts = 0;
            }
            entry.attempts += 1;
            entry.last_attempt = now;
            *entry
        };

        if self.increments.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            let pruned = self.prune(now, window);
            if pruned > 0 {
                debug!(pruned, "Pruned stale rate limit records");
            }
        }
        Ok(record)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}

/// Rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Failures allowed inside the window before blocking.
    pub max_attempts: u32,
    pub window_minutes: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_minutes: 15,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }
}

/// Gate in front of credential checks.
#[derive(Clone)]
pub struct LoginRateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for LoginRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Case and whitespace are not significant.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

impl LoginRateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Limiter backed by an in-memory store.
    pub fn in_memory(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()), config, clock)
    }

    /// Reject the attempt if the identifier is currently blocked.
    pub async fn check(&self, identifier: &str) -> CoreResult<()> {
        let key = normalize_identifier(identifier);
        let Some(record) = self.store.get(&key).await.map_err(CoreError::internal)? else {
            return Ok(());
        };

        let now = self.clock.now();
        let window = self.config.window();
        let elapsed = now - record.last_attempt;
        if elapsed >= window || record.attempts < self.config.max_attempts {
            return Ok(());
        }

        let remaining = window - elapsed;
        let retry_after_secs = u64::try_from(remaining.num_seconds()).unwrap_or(0).max(1);
        warn!(attempts = record.attempts, retry_after_secs, "Login rate limited");
        Err(CoreError::RateLimited { retry_after_secs })
    }

    pub async fn record_failure(&self, identifier: &str) -> CoreResult<()> {
        let key = normalize_identifier(identifier);
        let record = self
            .store
            .increment(&key, self.clock.now(), self.config.window())
            .await
            .map_err(CoreError::internal)?;
        debug!(attempts = record.attempts, "Recorded failed login");
        Ok(())
    }

    pub async fn record_success(&self, identifier: &str) -> CoreResult<()> {
        let key = normalize_identifier(identifier);
        self.store.reset(&key).await.map_err(CoreError::internal)
    }
}
