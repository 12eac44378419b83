//! Session lifecycle.
//!
//! Sessions are issued after authentication, validated on every gated call,
//! refreshed inside a renewal window and revoked on logout, password change
//! or expiry. Login attempts are rate limited per identifier.

pub mod cookie;
mod models;
pub mod rate_limit;
mod repository;
mod service;

pub use models::{Session, SessionOptions};
pub use rate_limit::{
    AttemptRecord, InMemoryRateLimitStore, LoginRateLimiter, RateLimitConfig, RateLimitStore,
};
pub use repository::SessionRepository;
pub use service::{SessionConfig, SessionManager};
