//! Per-key async locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Lazily created mutexes, one per key. An entry only lives while its lock
/// is held or awaited. Clones share the same set of locks.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

/// Holds one key's lock until dropped.
pub struct KeyedGuard {
    key: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard").field("key", &self.key).finish()
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold a clone of the mutex, so a count of one means the map
        // is the only owner left.
        self.locks
            .remove_if(self.key.as_str(), |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let held = locks.lock("c1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("c1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other keys are independent.
        drop(locks.lock("c2").await);

        drop(held);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_are_evicted_after_release() {
        let locks = KeyedLocks::new();
        for i in 0..50 {
            let _guard = locks.lock(&format!("chat-{i}")).await;
        }
        assert!(locks.is_empty());

        let guard = locks.lock("c1").await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());
    }
}
