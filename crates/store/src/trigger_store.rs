//! Trigger persistence — cron schedules and run-wake deferrals consumed by
//! the trigger dispatcher.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::entities::Trigger;
use uuid::Uuid;

#[derive(Default)]
pub struct TriggerStore {
    triggers: RwLock<HashMap<Uuid, Trigger>>,
}

impl TriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trigger: Trigger) -> Uuid {
        let id = trigger.id;
        self.triggers.write().insert(id, trigger);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Trigger> {
        self.triggers.read().get(&id).cloned()
    }

    pub fn disable(&self, id: Uuid) -> bool {
        let mut triggers = self.triggers.write();
        let Some(trigger) = triggers.get_mut(&id) else {
            return false;
        };
        trigger.enabled = false;
        true
    }

    pub fn reschedule(&self, id: Uuid, next_fire_at: DateTime<Utc>) -> bool {
        let mut triggers = self.triggers.write();
        let Some(trigger) = triggers.get_mut(&id) else {
            return false;
        };
        trigger.next_fire_at = next_fire_at;
        true
    }

    /// Triggers due at or before `now`, enabled, ordered by fire time.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        let mut due: Vec<Trigger> = self
            .triggers
            .read()
            .values()
            .filter(|t| t.enabled && t.next_fire_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_fire_at);
        due
    }
}
