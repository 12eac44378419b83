//! User accounts.
//!
//! Credential storage only; validation and hashing live in [`crate::auth`].

mod models;
mod repository;

pub use models::{CreateUser, User, UserInfo};
pub use repository::UserRepository;
