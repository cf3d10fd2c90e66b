//! Applies parsed memory ops against the store: secret refusal, per-level
//! caps, upsert-by-key, and the post-batch dedup/eviction pass.

use sa_domain::entities::{level_caps, MemoryItem, MemoryModule};
use sa_store::MemoryStore;

use crate::op::{MemoryOp, OpKind};
use crate::secrets::looks_like_secret;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ApplySummary {
    pub applied: usize,
    pub skipped: usize,
    pub archived: usize,
}

/// Apply one batch of ops for a user, then run the dedup/eviction pass.
pub fn apply_batch(store: &MemoryStore, user_id: &str, ops: Vec<MemoryOp>) -> ApplySummary {
    let mut summary = ApplySummary::default();

    for op in ops {
        if apply_one(store, user_id, &op) {
            summary.applied += 1;
        } else {
            summary.skipped += 1;
        }
    }

    summary.archived += dedupe_and_enforce_caps(store, user_id);
    summary
}

fn apply_one(store: &MemoryStore, user_id: &str, op: &MemoryOp) -> bool {
    match op.op {
        OpKind::Add | OpKind::Update => {
            let Some(value) = op.value.as_deref() else {
                return false;
            };
            if looks_like_secret(value) {
                return false;
            }
            let (_, max_chars) = level_caps(level_for(op.module));
            let truncated = truncate_chars(value, max_chars);

            let existing = store.find_by_key(user_id, op.module, &op.key);
            let item = match existing {
                Some(mut item) => {
                    item.value = truncated;
                    item.confidence = op.confidence;
                    item.archived = false;
                    item.last_seen_at = chrono::Utc::now();
                    item
                }
                None => MemoryItem::new(
                    user_id,
                    level_for(op.module),
                    op.module,
                    op.key.clone(),
                    truncated,
                    op.confidence,
                ),
            };
            store.upsert(item);
            true
        }
        OpKind::Delete => match store.find_by_key(user_id, op.module, &op.key) {
            Some(item) if !item.pinned => store.archive(item.id),
            _ => false,
        },
        OpKind::Touch => match store.find_by_key(user_id, op.module, &op.key) {
            Some(item) => store.touch(item.id),
            None => false,
        },
    }
}

/// The memory-writer prompt doesn't assign a level explicitly per op; ops
/// land at the level their module is conventionally distilled into. L0
/// covers stable identity facts, higher levels cover looser/volatile ones.
fn level_for(module: MemoryModule) -> u8 {
    match module {
        MemoryModule::Identity => 0,
        MemoryModule::Preferences => 1,
        MemoryModule::Constraints => 2,
        MemoryModule::Projects => 3,
        MemoryModule::Relationships => 3,
        MemoryModule::Environment => 4,
        MemoryModule::RecentContext => 5,
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect()
}

fn normalize_value(value: &str) -> String {
    value
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Archive duplicates by `(module, key)` normalized value, then evict the
/// oldest non-pinned items per level until under cap.
fn dedupe_and_enforce_caps(store: &MemoryStore, user_id: &str) -> usize {
    let mut archived = 0;
    let items = store.by_user(user_id);

    let mut seen_normalized: std::collections::HashMap<(MemoryModule, String), (uuid::Uuid, chrono::DateTime<chrono::Utc>)> =
        std::collections::HashMap::new();
    for item in &items {
        let norm_key = (item.module, normalize_value(&item.value));
        match seen_normalized.get(&norm_key) {
            Some((_, seen_at)) if *seen_at >= item.last_seen_at => {
                if !item.pinned {
                    store.archive(item.id);
                    archived += 1;
                }
            }
            Some((prev_id, _)) => {
                if let Some(prev) = items.iter().find(|i| i.id == *prev_id) {
                    if !prev.pinned {
                        store.archive(prev.id);
                        archived += 1;
                    }
                }
                seen_normalized.insert(norm_key, (item.id, item.last_seen_at));
            }
            None => {
                seen_normalized.insert(norm_key, (item.id, item.last_seen_at));
            }
        }
    }

    let remaining = store.by_user(user_id);
    let mut by_level: std::collections::BTreeMap<u8, Vec<MemoryItem>> = Default::default();
    for item in remaining {
        by_level.entry(item.level).or_default().push(item);
    }
    for (level, mut level_items) in by_level {
        let (max_items, _) = level_caps(level);
        if level_items.len() <= max_items {
            continue;
        }
        level_items.sort_by_key(|i| i.last_seen_at);
        let overflow = level_items.len() - max_items;
        let mut evicted = 0;
        for item in level_items.iter() {
            if evicted >= overflow {
                break;
            }
            if item.pinned {
                continue;
            }
            store.archive(item.id);
            archived += 1;
            evicted += 1;
        }
    }

    archived
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpKind;
    use sa_domain::entities::MemoryModule;

    fn op(kind: OpKind, module: MemoryModule, key: &str, value: Option<&str>) -> MemoryOp {
        MemoryOp {
            op: kind,
            module,
            key: key.into(),
            value: value.map(String::from),
            confidence: 0.8,
        }
    }

    #[test]
    fn add_creates_a_new_item() {
        let store = MemoryStore::new();
        let summary = apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Add, MemoryModule::Preferences, "fav_color", Some("blue"))],
        );
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(
            store.find_by_key("u1", MemoryModule::Preferences, "fav_color").unwrap().value,
            "blue"
        );
    }

    #[test]
    fn add_with_secret_value_is_skipped() {
        let store = MemoryStore::new();
        let summary = apply_batch(
            &store,
            "u1",
            vec![op(
                OpKind::Add,
                MemoryModule::Preferences,
                "api_key",
                Some("my api key is sk-ABCDEFGHIJ1234567890"),
            )],
        );
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.skipped, 1);
        assert!(store.find_by_key("u1", MemoryModule::Preferences, "api_key").is_none());
    }

    #[test]
    fn value_truncated_to_level_cap() {
        let store = MemoryStore::new();
        apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Add, MemoryModule::Identity, "bio", Some(&"x".repeat(500)))],
        );
        let item = store.find_by_key("u1", MemoryModule::Identity, "bio").unwrap();
        assert_eq!(item.value.len(), level_caps(0).1);
    }

    #[test]
    fn delete_archives_non_pinned_item() {
        let store = MemoryStore::new();
        apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Add, MemoryModule::Identity, "name", Some("Ada"))],
        );
        let summary = apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Delete, MemoryModule::Identity, "name", None)],
        );
        assert_eq!(summary.applied, 1);
        assert!(store.find_by_key("u1", MemoryModule::Identity, "name").unwrap().archived);
    }

    #[test]
    fn touch_refreshes_without_changing_value() {
        let store = MemoryStore::new();
        apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Add, MemoryModule::Identity, "name", Some("Ada"))],
        );
        let summary = apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Touch, MemoryModule::Identity, "name", None)],
        );
        assert_eq!(summary.applied, 1);
        assert_eq!(store.find_by_key("u1", MemoryModule::Identity, "name").unwrap().value, "Ada");
    }

    #[test]
    fn touch_missing_item_is_skipped() {
        let store = MemoryStore::new();
        let summary = apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Touch, MemoryModule::Identity, "ghost", None)],
        );
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn level_cap_evicts_oldest_non_pinned() {
        let store = MemoryStore::new();
        // L0 (identity) caps at 4 items; values are distinct so the dedup
        // pass leaves eviction to do the work.
        for i in 0..6 {
            apply_batch(
                &store,
                "u1",
                vec![op(OpKind::Add, MemoryModule::Identity, &format!("fact_{i}"), Some(&format!("value {i}")))],
            );
        }
        let active = store.by_user_and_module("u1", MemoryModule::Identity);
        assert_eq!(active.len(), level_caps(0).0);
        assert!(active.iter().all(|i| i.key != "fact_0" && i.key != "fact_1"));
    }

    #[test]
    fn duplicate_normalized_values_are_deduped() {
        let store = MemoryStore::new();
        apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Add, MemoryModule::Preferences, "color_a", Some("Blue!"))],
        );
        apply_batch(
            &store,
            "u1",
            vec![op(OpKind::Add, MemoryModule::Preferences, "color_b", Some("blue"))],
        );
        let active = store.by_user_and_module("u1", MemoryModule::Preferences);
        assert_eq!(active.len(), 1);
    }
}
