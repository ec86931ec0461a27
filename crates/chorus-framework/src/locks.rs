//! Per-resource async locks.
//!
//! [`KeyedLocks`] hands out one async mutex per resource id, created on first
//! use. Handlers that touch a shared resource (a chart file, a cache entry)
//! take the lock for that id, so two conversations working on the same
//! resource are serialized while different resources proceed in parallel.
//!
//! ```rust,ignore
//! static DOWNLOADS: LazyLock<KeyedLocks<u32>> = LazyLock::new(KeyedLocks::new);
//!
//! let _guard = DOWNLOADS.acquire(chart_id).await;
//! // only one download of `chart_id` at a time
//! ```
//!
//! Entries are never removed; the table grows with the number of distinct
//! ids seen.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A lazily populated table of async mutexes keyed by resource id.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex for `key`, creating it if needed.
    ///
    /// Every call with an equal key returns the same mutex.
    pub fn lock_for(&self, key: K) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(key).or_default())
    }

    /// Waits for exclusive access to `key`.
    ///
    /// The guard is owned, so it can be held across awaits and moved into
    /// spawned tasks.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        self.lock_for(key).lock_owned().await
    }

    /// Returns the number of ids seen so far.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

impl<K> fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("len", &self.locks.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_same_key_same_mutex() {
        let locks = KeyedLocks::new();
        let a = locks.lock_for("chart-1");
        let b = locks.lock_for("chart-1");
        let c = locks.lock_for("chart-2");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(7u32).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _held = locks.acquire(1u32).await;

        let other = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2u32)).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(20), locks.acquire(1u32)).await;
        assert!(same.is_err());
    }
}
