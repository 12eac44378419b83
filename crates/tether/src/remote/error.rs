//! Remote store error types.

use thiserror::Error;

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by a [`RemoteStore`](super::RemoteStore).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store could not be reached. Safe to retry.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// A unique constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote error: {0}")]
    Backend(String),
}

impl RemoteError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sqlx::Error> for RemoteError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("encoding: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_closed_is_unavailable() {
        let err: RemoteError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, RemoteError::Unavailable(_)));
        assert!(!err.is_conflict());
    }
}
