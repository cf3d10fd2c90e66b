//! Generic per-key in-flight counter for single-flight / bounded-fan-out
//! guards — the same shape used both for per-queue worker concurrency and
//! for the trigger dispatcher's per-trigger overlap guard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

pub struct ConcurrencyGuard {
    counts: RwLock<HashMap<Uuid, Arc<AtomicU32>>>,
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Try to acquire a slot for `key`. Returns `true` if under `max`.
    pub async fn try_acquire(&self, key: Uuid, max: u32) -> bool {
        let counter = {
            let mut map = self.counts.write().await;
            map.entry(key).or_insert_with(|| Arc::new(AtomicU32::new(0))).clone()
        };
        if counter.load(Ordering::SeqCst) >= max {
            return false;
        }
        counter.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub async fn release(&self, key: Uuid) {
        let map = self.counts.read().await;
        if let Some(counter) = map.get(&key) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub async fn in_flight(&self, key: Uuid) -> u32 {
        self.counts
            .read()
            .await
            .get(&key)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_blocks_once_at_limit() {
        let guard = ConcurrencyGuard::new();
        let id = Uuid::new_v4();
        assert!(guard.try_acquire(id, 2).await);
        assert!(guard.try_acquire(id, 2).await);
        assert!(!guard.try_acquire(id, 2).await);
        guard.release(id).await;
        assert!(guard.try_acquire(id, 2).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let guard = ConcurrencyGuard::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(guard.try_acquire(a, 1).await);
        assert!(guard.try_acquire(b, 1).await);
        assert!(!guard.try_acquire(a, 1).await);
    }
}
