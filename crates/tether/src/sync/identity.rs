//! Acting user for sync passes.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::session::SessionManager;

/// Resolves the user whose records the sync engine may write.
#[async_trait]
pub trait SyncIdentity: Send + Sync {
    /// `None` means nobody is signed in; nothing is synced.
    async fn current_user(&self) -> Option<String>;
}

/// A fixed user, for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncIdentity for StaticIdentity {
    async fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// The owner of a live session, re-validated on every pass.
#[derive(Debug)]
pub struct SessionIdentity {
    sessions: SessionManager,
    session_id: RwLock<Option<String>>,
}

impl SessionIdentity {
    pub fn new(sessions: SessionManager) -> Self {
        Self {
            sessions,
            session_id: RwLock::new(None),
        }
    }

    pub async fn set_session(&self, session_id: impl Into<String>) {
        *self.session_id.write().await = Some(session_id.into());
    }

    pub async fn clear(&self) {
        *self.session_id.write().await = None;
    }
}

#[async_trait]
impl SyncIdentity for SessionIdentity {
    async fn current_user(&self) -> Option<String> {
        let session_id = self.session_id.read().await.clone()?;
        self.sessions
            .validate_session(&session_id)
            .await
            .map(|session| session.user_id)
    }
}
