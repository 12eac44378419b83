//! Authoritative remote store boundary.
//!
//! [`RemoteStore`] is what the sync engine writes through. The SQLite
//! implementation works against the [`Database`](crate::db::Database) schema;
//! other backends only need to keep the upsert-by-natural-key contract.

mod error;
mod sqlite;
mod traits;

pub use error::{RemoteError, RemoteResult};
pub use sqlite::SqliteRemoteStore;
pub use traits::{NewProject, ProjectRecord, ProjectUpdate, RemoteFile, RemoteStore};
