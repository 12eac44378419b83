//! Offline-capable synchronization with the remote store.
//!
//! Writes are queued durably in the local store and drained into the remote
//! store by [`SyncEngine`]. Every op is an upsert by natural key, so a resend
//! after a crash or a lost response leaves one remote row. Failed entries are
//! retried with exponential backoff and dropped with a
//! [`SyncEvent::Failed`] once out of attempts.

mod backoff;
mod dedup;
mod engine;
mod events;
mod identity;
mod ops;
mod queue;

pub use backoff::BackoffPolicy;
pub use dedup::{DedupStore, InMemoryDedupStore, LocalDedupStore, ProjectRef};
pub use engine::{SyncConfig, SyncEngine};
pub use events::{DrainReport, SyncEvent, SyncStatus};
pub use identity::{SessionIdentity, StaticIdentity, SyncIdentity};
pub use ops::{SyncOp, SyncOpKind, SyncQueueEntry};
pub use queue::SyncQueue;
