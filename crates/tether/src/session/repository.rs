//! Session database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::instrument;

use super::models::{Session, SessionRow};

const SESSION_COLUMNS: &str = "id, user_id, created_at, expires_at, last_accessed_at, \
     remember_me, user_agent, ip_address";

/// Repository for session persistence.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn insert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_sessions (
                id, user_id, created_at, expires_at, last_accessed_at,
                remember_me, user_agent, ip_address
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.created_at.timestamp_millis())
        .bind(session.expires_at.timestamp_millis())
        .bind(session.last_accessed_at.timestamp_millis())
        .bind(session.remember_me)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    /// Fetch a session regardless of expiry.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = ?");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session")?;

        Ok(row.map(Session::from))
    }

    #[instrument(skip(self))]
    pub async fn touch(&self, id: &str, at_ms: i64) -> Result<()> {
        sqlx::query("UPDATE user_sessions SET last_accessed_at = ? WHERE id = ?")
            .bind(at_ms)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("touching session")?;

        Ok(())
    }

    /// Set a new expiry on a session that has not expired yet.
    /// Returns false when no live row matched.
    #[instrument(skip(self))]
    pub async fn update_expiry(
        &self,
        id: &str,
        expires_at_ms: i64,
        remember_me: bool,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET expires_at = ?, remember_me = ?, last_accessed_at = ?
            WHERE id = ? AND expires_at > ?
            "#,
        )
        .bind(expires_at_ms)
        .bind(remember_me)
        .bind(now_ms)
        .bind(id)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .context("refreshing session")?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("deleting user sessions")?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn delete_expired(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .context("deleting expired sessions")?;

        Ok(result.rows_affected())
    }

    /// Live sessions of a user, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: &str, now_ms: i64) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions \
             WHERE user_id = ? AND expires_at > ? \
             ORDER BY created_at DESC, rowid DESC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(user_id)
            .bind(now_ms)
            .fetch_all(&self.pool)
            .await
            .context("listing user sessions")?;

        Ok(rows.into_iter().map(Session::from).collect())
    }
}
