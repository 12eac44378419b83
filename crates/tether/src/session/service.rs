//! Session manager - issues, validates, refreshes and revokes sessions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use super::models::{Session, SessionOptions, from_millis};
use super::repository::SessionRepository;
use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult};

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a normal session.
    pub short_ttl_hours: i64,
    /// Lifetime of a "remember me" session.
    pub long_ttl_days: i64,
    /// How close to expiry a session becomes eligible for renewal.
    pub refresh_threshold_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            short_ttl_hours: 24,
            long_ttl_days: 30,
            refresh_threshold_minutes: 60,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self, remember_me: bool) -> Duration {
        if remember_me {
            Duration::days(self.long_ttl_days)
        } else {
            Duration::hours(self.short_ttl_hours)
        }
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::minutes(self.refresh_threshold_minutes)
    }
}

/// Owns every session row.
#[derive(Debug, Clone)]
pub struct SessionManager {
    repo: SessionRepository,
    config: SessionConfig,
    clock: SharedClock,
}

impl SessionManager {
    pub fn new(pool: SqlitePool, config: SessionConfig, clock: SharedClock) -> Self {
        Self {
            repo: SessionRepository::new(pool),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn generate_id() -> String {
        format!("sess_{}", nanoid::nanoid!(32))
    }

    /// Issue a session for a user that has just authenticated.
    #[instrument(skip(self, options), fields(remember_me = options.remember_me))]
    pub async fn create_session(
        &self,
        user_id: &str,
        options: SessionOptions,
    ) -> CoreResult<Session> {
        // Stored at millisecond precision; keep the returned value identical.
        let now = from_millis(self.clock.now_ms());
        let session = Session {
            id: Self::generate_id(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.config.ttl(options.remember_me),
            last_accessed_at: now,
            remember_me: options.remember_me,
            user_agent: options.user_agent,
            ip_address: options.ip_address,
        };

        self.repo.insert(&session).await.map_err(CoreError::internal)?;
        info!(user_id, expires_at = %session.expires_at, "Created session");

        Ok(session)
    }

    /// Look up a live session.
    ///
    /// Fails closed: lookup errors, unknown ids and expired rows all return
    /// `None`. Expired rows are deleted on the way out. Only
    /// `last_accessed_at` is updated, the expiry never moves here.
    #[instrument(skip(self, session_id))]
    pub async fn validate_session(&self, session_id: &str) -> Option<Session> {
        let now = self.clock.now();

        let mut session = match self.repo.get(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                warn!("Session lookup failed, treating as absent: {:#}", e);
                return None;
            }
        };

        if session.is_expired_at(now) {
            debug!(user_id = %session.user_id, "Session expired");
            if let Err(e) = self.repo.delete(&session.id).await {
                warn!("Failed to delete expired session: {:#}", e);
            }
            return None;
        }

        if let Err(e) = self.repo.touch(&session.id, now.timestamp_millis()).await {
            warn!("Failed to update session access time: {:#}", e);
        } else {
            session.last_accessed_at = now;
        }

        Some(session)
    }

    /// Like [`validate_session`](Self::validate_session) but with an error.
    pub async fn require_valid(&self, session_id: &str) -> CoreResult<Session> {
        self.validate_session(session_id)
            .await
            .ok_or(CoreError::SessionExpired)
    }

    /// Slide the expiry window forward from now.
    #[instrument(skip(self, session_id))]
    pub async fn refresh_session(
        &self,
        session_id: &str,
        remember_me: bool,
    ) -> CoreResult<DateTime<Utc>> {
        let now = self.clock.now();
        let expires_at = now + self.config.ttl(remember_me);

        let updated = self
            .repo
            .update_expiry(
                session_id,
                expires_at.timestamp_millis(),
                remember_me,
                now.timestamp_millis(),
            )
            .await
            .map_err(CoreError::internal)?;

        if !updated {
            return Err(CoreError::SessionExpired);
        }

        debug!(expires_at = %expires_at, "Refreshed session");
        Ok(expires_at)
    }

    /// Whether a session is inside the renewal window.
    pub fn needs_refresh(&self, session: &Session) -> bool {
        session.expires_at - self.clock.now() <= self.config.refresh_threshold()
    }

    /// Revoke one session. Unknown ids are fine.
    #[instrument(skip(self, session_id))]
    pub async fn destroy_session(&self, session_id: &str) -> CoreResult<()> {
        self.repo
            .delete(session_id)
            .await
            .map_err(CoreError::internal)
    }

    /// Revoke every session of a user.
    #[instrument(skip(self))]
    pub async fn destroy_all_user_sessions(&self, user_id: &str) -> CoreResult<u64> {
        let removed = self
            .repo
            .delete_for_user(user_id)
            .await
            .map_err(CoreError::internal)?;
        info!(user_id, removed, "Destroyed all user sessions");
        Ok(removed)
    }

    /// Delete all expired rows. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> CoreResult<u64> {
        let removed = self
            .repo
            .delete_expired(self.clock.now_ms())
            .await
            .map_err(CoreError::internal)?;
        if removed > 0 {
            info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Live sessions of a user, newest first.
    pub async fn list_user_sessions(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        self.repo
            .list_for_user(user_id, self.clock.now_ms())
            .await
            .map_err(CoreError::internal)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::Database;
    use crate::user::{CreateUser, UserRepository};

    async fn setup() -> (SessionManager, ManualClock, String, Database) {
        let db = Database::in_memory().await.unwrap();
        let user = UserRepository::new(db.pool().clone())
            .create(CreateUser {
                email: "ada@example.com".into(),
                password_hash: "x".into(),
                display_name: "Ada".into(),
            })
            .await
            .unwrap();
        let clock = ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap());
        let manager = SessionManager::new(
            db.pool().clone(),
            SessionConfig::default(),
            Arc::new(clock.clone()),
        );
        (manager, clock, user.id, db)
    }

    #[tokio::test]
    async fn test_ttl_depends_on_remember_me() {
        let (manager, _clock, user_id, _db) = setup().await;

        let short = manager
            .create_session(&user_id, SessionOptions::default())
            .await
            .unwrap();
        assert!(short.id.starts_with("sess_"));
        assert_eq!(short.id.len(), "sess_".len() + 32);
        assert_eq!(short.expires_at - short.created_at, Duration::hours(24));

        let long = manager
            .create_session(&user_id, SessionOptions::remember_me())
            .await
            .unwrap();
        assert_eq!(long.expires_at - long.created_at, Duration::days(30));
    }

    #[tokio::test]
    async fn test_expired_session_is_absent_and_deleted() {
        let (manager, clock, user_id, _db) = setup().await;
        let session = manager
            .create_session(&user_id, SessionOptions::default())
            .await
            .unwrap();

        clock.advance(Duration::hours(23));
        let live = manager.validate_session(&session.id).await.unwrap();
        assert_eq!(live.expires_at, session.expires_at);
        assert!(live.last_accessed_at > session.last_accessed_at);

        clock.advance(Duration::hours(1));
        assert!(manager.validate_session(&session.id).await.is_none());
        assert!(manager.repo.get(&session.id).await.unwrap().is_none());

        let err = manager.require_valid(&session.id).await.unwrap_err();
        assert_eq!(err, CoreError::SessionExpired);
    }

    #[tokio::test]
    async fn test_refresh_slides_expiry() {
        let (manager, clock, user_id, _db) = setup().await;
        let session = manager
            .create_session(&user_id, SessionOptions::default())
            .await
            .unwrap();
        assert!(!manager.needs_refresh(&session));

        clock.advance(Duration::hours(23) + Duration::minutes(30));
        assert!(manager.needs_refresh(&session));

        let new_expiry = manager.refresh_session(&session.id, false).await.unwrap();
        assert_eq!(new_expiry, clock.now() + Duration::hours(24));

        clock.advance(Duration::hours(2));
        assert!(manager.validate_session(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_of_gone_session_fails() {
        let (manager, clock, user_id, _db) = setup().await;
        let session = manager
            .create_session(&user_id, SessionOptions::default())
            .await
            .unwrap();

        clock.advance(Duration::hours(25));
        let err = manager.refresh_session(&session.id, false).await.unwrap_err();
        assert_eq!(err, CoreError::SessionExpired);

        let err = manager.refresh_session("sess_unknown", true).await.unwrap_err();
        assert_eq!(err, CoreError::SessionExpired);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_cascades() {
        let (manager, _clock, user_id, _db) = setup().await;
        let a = manager
            .create_session(&user_id, SessionOptions::default())
            .await
            .unwrap();
        manager
            .create_session(&user_id, SessionOptions::remember_me())
            .await
            .unwrap();

        manager.destroy_session(&a.id).await.unwrap();
        manager.destroy_session(&a.id).await.unwrap();
        assert_eq!(manager.list_user_sessions(&user_id).await.unwrap().len(), 1);

        assert_eq!(manager.destroy_all_user_sessions(&user_id).await.unwrap(), 1);
        assert_eq!(manager.destroy_all_user_sessions(&user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_and_list() {
        let (manager, clock, user_id, _db) = setup().await;
        let short = manager
            .create_session(&user_id, SessionOptions::default())
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let long = manager
            .create_session(&user_id, SessionOptions::remember_me())
            .await
            .unwrap();

        let listed = manager.list_user_sessions(&user_id).await.unwrap();
        assert_eq!(listed[0].id, long.id);
        assert_eq!(listed[1].id, short.id);

        clock.advance(Duration::days(2));
        assert_eq!(manager.sweep_expired().await.unwrap(), 1);
        let listed = manager.list_user_sessions(&user_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, long.id);
    }
}
