//! Error taxonomy exposed at component boundaries.
//!
//! The session manager, auth service and sync engine catch every transport,
//! database and storage error and map it into [`CoreError`] before returning.
//! Raw sqlx or I/O errors never cross those boundaries.

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::local::StoreError;
use crate::remote::RemoteError;

pub type CoreResult<T> = Result<T, CoreError>;

/// Closed set of errors callers can observe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Unknown user or wrong password. The two are never distinguished.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account with this email already exists")]
    UserExists,

    #[error("weak password: {0}")]
    WeakPassword(String),

    /// Session missing, expired or otherwise unusable.
    #[error("session expired")]
    SessionExpired,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("too many login attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A queued operation exhausted its retries.
    #[error("sync failed for operation {op_id}: {reason}")]
    SyncFailed { op_id: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn weak_password(msg: impl Into<String>) -> Self {
        Self::WeakPassword(msg.into())
    }

    /// Log the full chain of an underlying error and collapse it into
    /// [`CoreError::Internal`].
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        error!(error = ?err, "internal error");
        Self::Internal(err.to_string())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::UserExists => "USER_EXISTS",
            Self::WeakPassword(_) => "WEAK_PASSWORD",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SyncFailed { .. } => "SYNC_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Internal(_))
    }

    /// Message safe to show to end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password.".to_string(),
            Self::UserExists => "An account with this email already exists.".to_string(),
            Self::WeakPassword(reason) => format!("Please choose a stronger password: {reason}."),
            Self::SessionExpired | Self::Unauthorized(_) => {
                "Your session has ended. Please sign in again.".to_string()
            }
            Self::RateLimited { retry_after_secs } => format!(
                "Too many attempts. Try again in {} minute(s).",
                retry_after_secs.div_ceil(60).max(1)
            ),
            Self::SyncFailed { .. } => {
                "Some changes could not be synced yet. They are saved on this device.".to_string()
            }
            Self::Internal(_) => "Something went wrong. Please try again.".to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.user_message(),
            code: self.code(),
            details: match self {
                Self::SyncFailed { op_id, .. } => Some(op_id.clone()),
                _ => None,
            },
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        Self::internal(err)
    }
}

impl From<RemoteError> for CoreError {
    fn from(err: RemoteError) -> Self {
        Self::internal(err)
    }
}

/// Structured error body for collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CoreError::InvalidCredentials.code(), "INVALID_CREDENTIALS");
        assert_eq!(
            CoreError::RateLimited {
                retry_after_secs: 5
            }
            .code(),
            "RATE_LIMITED"
        );
        assert_eq!(CoreError::Internal("x".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_user_message_does_not_leak_internal_detail() {
        let err = CoreError::Internal("database is locked".to_string());
        assert!(!err.user_message().contains("database"));
    }

    #[test]
    fn test_rate_limited_message_rounds_up_minutes() {
        let err = CoreError::RateLimited {
            retry_after_secs: 61,
        };
        assert!(err.user_message().contains("2 minute"));
    }

    #[test]
    fn test_store_error_maps_to_internal() {
        let err: CoreError = StoreError::Backend("disk full".into()).into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_response_body() {
        let body = CoreError::SyncFailed {
            op_id: "op1".into(),
            reason: "offline".into(),
        }
        .to_response();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "SYNC_FAILED");
        assert_eq!(json["details"], "op1");
    }
}
