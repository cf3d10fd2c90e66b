//! Memory item persistence. Enforcing per-level caps, dedup, and eviction
//! is the Memory Writer's job; this store only gives it atomic
//! primitives to build on: lookup by `(user, module, key)`, full listing
//! per user/module, and delete-by-id for eviction.

use std::collections::HashMap;

use parking_lot::RwLock;
use sa_domain::entities::{MemoryItem, MemoryModule};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, MemoryItem>,
    /// (user_id, module, key) -> item id, for O(1) dedup lookups.
    by_key: HashMap<(String, MemoryModule, String), Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, item: MemoryItem) -> Uuid {
        let id = item.id;
        let key = (item.user_id.clone(), item.module, item.key.clone());
        let mut inner = self.inner.write();
        if let Some(existing_id) = inner.by_key.get(&key).copied() {
            inner.items.remove(&existing_id);
        }
        inner.by_key.insert(key, id);
        inner.items.insert(id, item);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryItem> {
        self.inner.read().items.get(&id).cloned()
    }

    pub fn find_by_key(&self, user_id: &str, module: MemoryModule, key: &str) -> Option<MemoryItem> {
        let inner = self.inner.read();
        let id = inner
            .by_key
            .get(&(user_id.to_string(), module, key.to_string()))?;
        inner.items.get(id).cloned()
    }

    pub fn by_user(&self, user_id: &str) -> Vec<MemoryItem> {
        self.inner
            .read()
            .items
            .values()
            .filter(|i| i.user_id == user_id && !i.archived)
            .cloned()
            .collect()
    }

    pub fn by_user_and_module(&self, user_id: &str, module: MemoryModule) -> Vec<MemoryItem> {
        self.inner
            .read()
            .items
            .values()
            .filter(|i| i.user_id == user_id && i.module == module && !i.archived)
            .cloned()
            .collect()
    }

    /// Archive (soft-delete) an item for eviction, preserving it for audit.
    pub fn archive(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(item) = inner.items.get_mut(&id) else {
            return false;
        };
        item.archived = true;
        true
    }

    /// Refresh `last_seen_at` and unarchive, for a `touch` memory-writer op.
    pub fn touch(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(item) = inner.items.get_mut(&id) else {
            return false;
        };
        item.archived = false;
        item.last_seen_at = chrono::Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing_key() {
        let store = MemoryStore::new();
        let first = MemoryItem::new("u1", 1, MemoryModule::Preferences, "fav_color", "blue", 0.8);
        let first_id = first.id;
        store.upsert(first);

        let second = MemoryItem::new("u1", 1, MemoryModule::Preferences, "fav_color", "green", 0.95);
        let second_id = store.upsert(second);

        assert_ne!(first_id, second_id);
        assert!(store.get(first_id).is_none());
        let found = store
            .find_by_key("u1", MemoryModule::Preferences, "fav_color")
            .unwrap();
        assert_eq!(found.value, "green");
    }

    #[test]
    fn by_user_excludes_archived() {
        let store = MemoryStore::new();
        let item = MemoryItem::new("u1", 0, MemoryModule::Identity, "name", "Ada", 1.0);
        let id = store.upsert(item);
        assert_eq!(store.by_user("u1").len(), 1);

        store.archive(id);
        assert_eq!(store.by_user("u1").len(), 0);
    }

    #[test]
    fn touch_unarchives_and_refreshes_last_seen() {
        let store = MemoryStore::new();
        let item = MemoryItem::new("u1", 0, MemoryModule::Identity, "name", "Ada", 1.0);
        let id = item.id;
        let created_at = item.created_at;
        store.upsert(item);
        store.archive(id);

        assert!(store.touch(id));
        let touched = store.get(id).unwrap();
        assert!(!touched.archived);
        assert!(touched.last_seen_at >= created_at);
    }

    #[test]
    fn touch_missing_id_returns_false() {
        let store = MemoryStore::new();
        assert!(!store.touch(Uuid::new_v4()));
    }

    #[test]
    fn by_user_and_module_filters() {
        let store = MemoryStore::new();
        store.upsert(MemoryItem::new("u1", 0, MemoryModule::Identity, "name", "Ada", 1.0));
        store.upsert(MemoryItem::new("u1", 1, MemoryModule::Preferences, "tz", "UTC", 0.9));

        assert_eq!(store.by_user_and_module("u1", MemoryModule::Identity).len(), 1);
        assert_eq!(store.by_user_and_module("u1", MemoryModule::Preferences).len(), 1);
        assert_eq!(store.by_user_and_module("u1", MemoryModule::Projects).len(), 0);
    }
}
