//! Password and email checks.

use anyhow::{Context, Result};

use crate::error::{CoreError, CoreResult};

/// Lowercase and trim an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email validation.
pub fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    !parts[0].is_empty()
        && parts[1].contains('.')
        && !parts[1].starts_with('.')
        && !parts[1].ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// Reject passwords that are short or lack a letter or a digit.
pub fn check_password_strength(password: &str, min_length: usize) -> CoreResult<()> {
    if password.chars().count() < min_length {
        return Err(CoreError::weak_password(format!(
            "must be at least {min_length} characters"
        )));
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(CoreError::weak_password("must contain a letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(CoreError::weak_password("must contain a digit"));
    }
    Ok(())
}

/// Hash a password using bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).context("Failed to hash password")
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash).context("Failed to verify password")
}

/// Run bcrypt off the async executor.
pub(crate) async fn hash_password_blocking(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .context("password hashing task panicked")?
}

pub(crate) async fn verify_password_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task panicked")?
}
