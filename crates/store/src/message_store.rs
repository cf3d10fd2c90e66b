//! Per-channel message persistence and delivery-status tracking.

use std::collections::HashMap;

use parking_lot::RwLock;
use sa_domain::entities::{DeliveryStatus, Message};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Message>,
    /// channel_id -> message ids, insertion order preserved.
    by_channel: HashMap<String, Vec<Uuid>>,
}

#[derive(Default)]
pub struct MessageStore {
    inner: RwLock<Inner>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message: Message) -> Uuid {
        let id = message.id;
        let mut inner = self.inner.write();
        inner
            .by_channel
            .entry(message.channel_id.clone())
            .or_default()
            .push(id);
        inner.messages.insert(id, message);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.inner.read().messages.get(&id).cloned()
    }

    pub fn by_channel(&self, channel_id: &str) -> Vec<Message> {
        let inner = self.inner.read();
        inner
            .by_channel
            .get(channel_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect()
    }

    /// Messages of one context in creation order. Used by the memory writer
    /// to build a segment when the job doesn't supply one.
    pub fn by_context(&self, context_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .inner
            .read()
            .messages
            .values()
            .filter(|m| m.context_id.as_deref() == Some(context_id))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages
    }

    /// Mark a pending (Discord) delivery resolved. Used by the
    /// `delivery-acks` queue consumer.
    pub fn mark_delivered(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(message) = inner.messages.get_mut(&id) else {
            return false;
        };
        message.delivery_status = DeliveryStatus::Delivered;
        message.delivered_at = Some(chrono::Utc::now());
        true
    }

    pub fn mark_failed(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(message) = inner.messages.get_mut(&id) else {
            return false;
        };
        message.delivery_status = DeliveryStatus::Failed;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_list_by_channel() {
        let store = MessageStore::new();
        store.insert(Message::inbound("u1", "web", "hi"));
        store.insert(Message::inbound("u1", "web", "again"));
        store.insert(Message::inbound("u2", "discord:1", "hello"));

        assert_eq!(store.by_channel("web").len(), 2);
        assert_eq!(store.by_channel("discord:1").len(), 1);
    }

    #[test]
    fn mark_delivered_updates_pending_discord_message() {
        let store = MessageStore::new();
        let id = store.insert(Message::outbound("u1", "discord:1", "hi", Uuid::new_v4()));
        assert_eq!(
            store.get(id).unwrap().delivery_status,
            DeliveryStatus::Pending
        );

        assert!(store.mark_delivered(id));
        let msg = store.get(id).unwrap();
        assert_eq!(msg.delivery_status, DeliveryStatus::Delivered);
        assert!(msg.delivered_at.is_some());
    }

    #[test]
    fn mark_failed_on_missing_message_returns_false() {
        let store = MessageStore::new();
        assert!(!store.mark_failed(Uuid::new_v4()));
    }

    #[test]
    fn by_context_filters_and_orders_by_creation() {
        let store = MessageStore::new();
        let mut first = Message::inbound("u1", "web", "one");
        first.context_id = Some("ctx-1".into());
        let mut second = Message::inbound("u1", "web", "two");
        second.context_id = Some("ctx-1".into());
        let mut other = Message::inbound("u1", "web", "elsewhere");
        other.context_id = Some("ctx-2".into());
        store.insert(second.clone());
        store.insert(first.clone());
        store.insert(other);

        let segment = store.by_context("ctx-1");
        assert_eq!(segment.len(), 2);
        assert!(segment[0].created_at <= segment[1].created_at);
    }
}
