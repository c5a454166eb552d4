use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async mutexes.
///
/// Holders of the same key are serialized, different keys never wait on each
/// other. An entry lives in the map only while some caller holds or waits on
/// it, so the map does not grow with every name ever written.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

pub struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Locks every distinct key in `keys`, always in sorted order so two
    /// callers locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, keys: &[&str]) -> Vec<KeyGuard<'_>> {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex (and its Arc) before checking whether anyone
        // else still references the entry.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("myfunc").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("myfunc").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b"))
            .await
            .expect("lock on a different key must not wait");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_all_in_opposite_order_does_not_deadlock() {
        let locks = Arc::new(KeyLocks::new());
        let handles = (0..16)
            .map(|i| {
                let locks = locks.clone();
                tokio::spawn(async move {
                    let keys = if i % 2 == 0 { ["a", "b"] } else { ["b", "a"] };
                    let _guards = locks.lock_all(&keys).await;
                    tokio::task::yield_now().await;
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("overlapping lock sets must not deadlock")
                .unwrap();
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_all_dedups_keys() {
        let locks = KeyLocks::new();
        let guards = tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock_all(&["myfunc", "myfunc"]),
        )
        .await
        .expect("locking the same key twice in one call must not wait on itself");
        assert_eq!(guards.len(), 1);
    }
}
