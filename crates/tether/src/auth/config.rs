//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// bcrypt work factor.
    pub bcrypt_cost: u32,

    /// Minimum password length.
    pub min_password_length: usize,

    /// Add the Secure flag to cookies. Off for plain-http development.
    pub secure_cookies: bool,

    /// Where unauthenticated callers are sent.
    pub login_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
            min_password_length: 8,
            secure_cookies: false,
            login_path: "/login".to_string(),
        }
    }
}

impl AuthConfig {
    /// Fast hashing for tests.
    pub fn for_testing() -> Self {
        Self {
            bcrypt_cost: 4,
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(4..=31).contains(&self.bcrypt_cost) {
            anyhow::bail!("auth.bcrypt_cost must be between 4 and 31");
        }
        if self.min_password_length < 8 {
            anyhow::bail!("auth.min_password_length must be at least 8");
        }
        if !self.login_path.starts_with('/') {
            anyhow::bail!("auth.login_path must be an absolute path");
        }
        Ok(())
    }
}
