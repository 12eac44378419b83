//! Tether core library.
//!
//! Keeps chat and project state correct across a local durable store, an
//! authoritative remote store and unreliable connectivity. The pieces are:
//!
//! - [`local`]: client-side key-value persistence
//! - [`remote`]: the authoritative store boundary and its SQLite implementation
//! - [`session`], [`auth`], [`user`]: session lifecycle and rate-limited login
//! - [`snapshot`]: snapshots and deterministic rewind
//! - [`sync`]: the offline queue, retry/backoff and dedup
//! - [`chat`]: the facade the chat layer talks to

pub mod auth;
pub mod chat;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod local;
pub mod remote;
pub mod session;
pub mod snapshot;
pub mod sync;
pub mod user;

pub use error::{CoreError, CoreResult};
