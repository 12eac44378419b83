//! Authentication service.
//!
//! Sits in front of the session manager: credential checks, registration,
//! password changes and the request gate used by route loaders.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use super::config::AuthConfig;
use super::password::{
    check_password_strength, hash_password_blocking, is_valid_email, normalize_email,
    verify_password_blocking,
};
use crate::error::{CoreError, CoreResult};
use crate::session::cookie::decode_remember_me;
use crate::session::{LoginRateLimiter, Session, SessionManager, SessionOptions};
use crate::user::{CreateUser, UserInfo, UserRepository};

/// A user together with the session just issued for them.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: UserInfo,
    pub session: Session,
}

/// Result of gating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Session),
    /// Send the caller to this path.
    Redirect(String),
}

impl AuthOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Redirect(_) => None,
        }
    }
}

/// Verified against when the email is unknown, so both failure paths pay
/// for one bcrypt check.
const DUMMY_PASSWORD: &str = "tether-dummy-password-0";

#[derive(Debug, Clone)]
pub struct AuthService {
    users: UserRepository,
    sessions: SessionManager,
    limiter: LoginRateLimiter,
    config: AuthConfig,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(
        users: UserRepository,
        sessions: SessionManager,
        limiter: LoginRateLimiter,
        config: AuthConfig,
    ) -> Self {
        Self {
            users,
            sessions,
            limiter,
            config,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Hash at the configured cost, computed on first use.
    async fn dummy_hash(&self) -> CoreResult<String> {
        self.dummy_hash
            .get_or_try_init(|| {
                hash_password_blocking(DUMMY_PASSWORD.to_string(), self.config.bcrypt_cost)
            })
            .await
            .cloned()
            .map_err(CoreError::internal)
    }

    /// Create an account and sign it in.
    #[instrument(skip(self, password, display_name, options))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        options: SessionOptions,
    ) -> CoreResult<AuthSession> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(CoreError::InvalidCredentials);
        }
        check_password_strength(password, self.config.min_password_length)?;

        if !self
            .users
            .is_email_available(&email)
            .await
            .map_err(CoreError::internal)?
        {
            return Err(CoreError::UserExists);
        }

        let password_hash = hash_password_blocking(password.to_string(), self.config.bcrypt_cost)
            .await
            .map_err(CoreError::internal)?;

        let display_name = match display_name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };

        let user = match self
            .users
            .create(CreateUser {
                email: email.clone(),
                password_hash,
                display_name,
            })
            .await
        {
            Ok(user) => user,
            Err(e) => {
                // Lost a race with a concurrent registration.
                if !self
                    .users
                    .is_email_available(&email)
                    .await
                    .map_err(CoreError::internal)?
                {
                    return Err(CoreError::UserExists);
                }
                return Err(CoreError::internal(e));
            }
        };
        info!(user_id = %user.id, "Registered user");

        let session = self.sessions.create_session(&user.id, options).await?;
        Ok(AuthSession {
            user: user.into(),
            session,
        })
    }

    /// Check credentials and issue a session.
    ///
    /// The rate limit is checked first, so a blocked identifier is rejected
    /// even with the right password. Unknown email and wrong password produce
    /// the same error.
    #[instrument(skip(self, password, options))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        options: SessionOptions,
    ) -> CoreResult<AuthSession> {
        let email = normalize_email(email);
        self.limiter.check(&email).await?;

        let user = self
            .users
            .get_by_email(&email)
            .await
            .map_err(CoreError::internal)?;

        let hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash().await?,
        };
        let verified = verify_password_blocking(password.to_string(), hash)
            .await
            .map_err(CoreError::internal)?;

        let Some(user) = user.filter(|_| verified) else {
            self.limiter.record_failure(&email).await?;
            warn!("Failed login attempt");
            return Err(CoreError::InvalidCredentials);
        };

        self.limiter.record_success(&email).await?;
        let session = self.sessions.create_session(&user.id, options).await?;

        if let Err(e) = self
            .users
            .update_last_login(&user.id, session.created_at.timestamp_millis())
            .await
        {
            warn!("Failed to record last login: {:#}", e);
        }

        info!(user_id = %user.id, "User logged in");
        Ok(AuthSession {
            user: user.into(),
            session,
        })
    }

    pub async fn logout(&self, session_id: &str) -> CoreResult<()> {
        self.sessions.destroy_session(session_id).await
    }

    /// Change a password. Every existing session of the user is revoked and a
    /// fresh one is returned.
    #[instrument(skip(self, current_password, new_password, options))]
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
        options: SessionOptions,
    ) -> CoreResult<Session> {
        let user = self
            .users
            .get(user_id)
            .await
            .map_err(CoreError::internal)?
            .ok_or(CoreError::InvalidCredentials)?;

        let verified =
            verify_password_blocking(current_password.to_string(), user.password_hash.clone())
                .await
                .map_err(CoreError::internal)?;
        if !verified {
            return Err(CoreError::InvalidCredentials);
        }

        check_password_strength(new_password, self.config.min_password_length)?;

        let password_hash =
            hash_password_blocking(new_password.to_string(), self.config.bcrypt_cost)
                .await
                .map_err(CoreError::internal)?;
        self.users
            .update_password(user_id, &password_hash)
            .await
            .map_err(CoreError::internal)?;

        self.sessions.destroy_all_user_sessions(user_id).await?;
        info!(user_id, "Password changed, sessions revoked");

        self.sessions.create_session(user_id, options).await
    }

    /// Gate a request on its session token.
    ///
    /// Sessions inside the renewal window are refreshed on the way through.
    #[instrument(skip(self, token))]
    pub async fn require_auth(&self, token: Option<&str>) -> AuthOutcome {
        let redirect = || AuthOutcome::Redirect(self.config.login_path.clone());

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return redirect();
        };
        let Some(mut session) = self.sessions.validate_session(token).await else {
            return redirect();
        };

        if self.sessions.needs_refresh(&session) {
            match self
                .sessions
                .refresh_session(&session.id, session.remember_me)
                .await
            {
                Ok(expires_at) => session.expires_at = expires_at,
                Err(CoreError::SessionExpired) => return redirect(),
                Err(e) => warn!("Session refresh failed: {}", e),
            }
        }

        AuthOutcome::Authenticated(session)
    }

    /// The signed-in user, or `None`.
    pub async fn get_current_user(&self, token: Option<&str>) -> Option<UserInfo> {
        let session = self.require_auth(token).await;
        let session = session.session()?;
        match self.users.get(&session.user_id).await {
            Ok(user) => user.map(UserInfo::from),
            Err(e) => {
                warn!("User lookup failed: {:#}", e);
                None
            }
        }
    }

    /// Recover a session from a remember-me cookie value.
    pub async fn restore_from_remember_me(&self, cookie_value: &str) -> Option<Session> {
        let token = decode_remember_me(cookie_value)?;
        let session = self.sessions.validate_session(&token.session_id).await?;
        if session.user_id != token.user_id {
            warn!("Remember-me token user does not match session");
            return None;
        }
        Some(session)
    }
}
