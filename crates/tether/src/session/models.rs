//! Session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An authenticated user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session ID (`sess_` prefix).
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub remember_me: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Seconds until expiry, zero if already expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Database row. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_accessed_at: i64,
    pub remember_me: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            created_at: from_millis(row.created_at),
            expires_at: from_millis(row.expires_at),
            last_accessed_at: from_millis(row.last_accessed_at),
            remember_me: row.remember_me,
            user_agent: row.user_agent,
            ip_address: row.ip_address,
        }
    }
}

/// Client details recorded with a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub remember_me: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl SessionOptions {
    pub fn remember_me() -> Self {
        Self {
            remember_me: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_and_expiry() {
        let row = SessionRow {
            id: "sess_x".into(),
            user_id: "usr_1".into(),
            created_at: 1_000,
            expires_at: 61_000,
            last_accessed_at: 1_000,
            remember_me: false,
            user_agent: None,
            ip_address: None,
        };
        let session = Session::from(row);
        assert_eq!(session.expires_at.timestamp_millis(), 61_000);
        assert!(!session.is_expired_at(from_millis(60_999)));
        assert!(session.is_expired_at(from_millis(61_000)));
        assert_eq!(session.remaining_secs(from_millis(1_000)), 60);
        assert_eq!(session.remaining_secs(from_millis(100_000)), 0);
    }
}
