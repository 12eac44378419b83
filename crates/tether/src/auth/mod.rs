//! Authentication.
//!
//! Registration, rate-limited login, password changes and the session gate
//! consumed by route loaders.

mod config;
pub mod password;
mod service;

pub use config::AuthConfig;
pub use service::{AuthOutcome, AuthService, AuthSession};
