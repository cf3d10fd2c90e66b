//! Per-run cancellation tokens with group fan-out.
//!
//! Each executing run gets a `CancelToken`; calling `cancel()` signals the
//! run engine to stop cleanly at the next iteration boundary. A group cancel
//! cascades from a parent run to every child registered under it, mirroring
//! the store's cascade-cancel for the in-flight (not-yet-persisted) half of
//! a cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
    /// parent run id -> set of child run ids.
    groups: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, run_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id, token.clone());
        token
    }

    /// Cancel a run and cascade to every child registered in its group.
    /// Returns true if a token for `run_id` was found.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(&run_id) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(&run_id) {
            let tokens = self.tokens.lock();
            for child_id in children {
                if let Some(child_token) = tokens.get(child_id) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    pub fn remove(&self, run_id: Uuid) {
        self.tokens.lock().remove(&run_id);
        self.groups.lock().remove(&run_id);
    }

    pub fn is_running(&self, run_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&run_id)
    }

    pub fn add_to_group(&self, parent_run_id: Uuid, child_run_id: Uuid) {
        self.groups
            .lock()
            .entry(parent_run_id)
            .or_default()
            .insert(child_run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_cascades_to_children() {
        let map = CancelMap::new();
        let parent_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let parent = map.register(parent_id);
        let child = map.register(child_id);
        map.add_to_group(parent_id, child_id);

        assert!(!child.is_cancelled());
        map.cancel(parent_id);
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn remove_forgets_the_token() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        map.register(run_id);
        assert!(map.is_running(run_id));
        map.remove(run_id);
        assert!(!map.is_running(run_id));
        assert!(!map.cancel(run_id));
    }

    #[test]
    fn cancel_unregistered_run_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(Uuid::new_v4()));
    }
}
