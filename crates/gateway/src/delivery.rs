//! Outbound message side effects: the `messages` queue carries both
//! `outbound_message` jobs (insert the row, hand Discord deliveries to the
//! adapter) and `delivery` jobs (push content to the channel provider);
//! `delivery-acks` closes the loop by updating delivery status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sa_domain::entities::Message;
use sa_queue::{Job, QueueName};
use uuid::Uuid;

use crate::state::AppState;

/// Pushes one outbound message to a channel provider. Implemented per
/// channel family (web is a no-op — the stored row is the delivery).
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn deliver(&self, message_id: Uuid, payload: &serde_json::Value) -> Result<(), String>;
}

/// Stand-in adapter for deployments without a real channel integration:
/// logs the delivery and reports success so the ack path stays exercised.
pub struct LoggingAdapter;

#[async_trait]
impl ChannelAdapter for LoggingAdapter {
    async fn deliver(&self, message_id: Uuid, payload: &serde_json::Value) -> Result<(), String> {
        tracing::info!(message_id = %message_id, payload = %payload, "delivery (logging adapter)");
        Ok(())
    }
}

fn field<'a>(payload: &'a serde_json::Value, name: &str) -> Result<&'a str, String> {
    payload
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing field '{name}'"))
}

/// Consume one job from the `messages` queue.
pub async fn handle_messages_job(state: &Arc<AppState>, payload: &serde_json::Value) -> Result<(), String> {
    match payload.get("type").and_then(|t| t.as_str()) {
        Some("outbound_message") => {
            let run_id = field(payload, "runId")?.parse::<Uuid>().map_err(|e| e.to_string())?;
            let user_id = field(payload, "userId")?;
            let channel_id = field(payload, "channelId")?;
            let content = field(payload, "message")?;
            send_run_message(state, run_id, user_id, channel_id, content).await;
            Ok(())
        }
        Some("delivery") => {
            let message_id = field(payload, "messageId")?.parse::<Uuid>().map_err(|e| e.to_string())?;
            let body = payload.get("payload").cloned().unwrap_or(serde_json::Value::Null);
            let ack = match state.delivery.deliver(message_id, &body).await {
                Ok(()) => serde_json::json!({ "type": "delivery_ack", "messageId": message_id, "status": "delivered" }),
                Err(error) => serde_json::json!({ "type": "delivery_ack", "messageId": message_id, "status": "failed", "error": error }),
            };
            state
                .queue_store
                .enqueue(Job::new(QueueName::DeliveryAcks, ack, Utc::now()))
                .await;
            Ok(())
        }
        other => Err(format!("unknown messages job type {other:?}")),
    }
}

/// Insert the outbound row; Discord channels additionally get a delivery
/// job carrying the target user id and content. Web rows are born
/// delivered.
pub async fn send_run_message(state: &Arc<AppState>, run_id: Uuid, user_id: &str, channel_id: &str, content: &str) {
    let message = Message::outbound(user_id, channel_id, content, run_id);
    let message_id = message.id;
    state.message_store.insert(message);

    if let Some(discord_user_id) = channel_id.strip_prefix("discord:") {
        let job = Job::new(
            QueueName::Messages,
            serde_json::json!({
                "type": "delivery",
                "provider": "discord",
                "messageId": message_id,
                "payload": { "discordUserId": discord_user_id, "content": content },
            }),
            Utc::now(),
        );
        state.queue_store.enqueue(job).await;
    }
}

/// Consume one job from the `delivery-acks` queue.
pub async fn handle_delivery_ack(state: &Arc<AppState>, payload: &serde_json::Value) -> Result<(), String> {
    let message_id = field(payload, "messageId")?.parse::<Uuid>().map_err(|e| e.to_string())?;
    match field(payload, "status")? {
        "delivered" => {
            state.message_store.mark_delivered(message_id);
            Ok(())
        }
        "failed" => {
            let error = payload.get("error").and_then(|e| e.as_str()).unwrap_or("unknown");
            tracing::warn!(message_id = %message_id, error = %error, "delivery failed");
            state.message_store.mark_failed(message_id);
            Ok(())
        }
        other => Err(format!("unknown delivery status '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_app_state;
    use sa_domain::config::Config;
    use sa_domain::entities::DeliveryStatus;

    fn state() -> Arc<AppState> {
        Arc::new(build_app_state(Arc::new(Config::default())).unwrap())
    }

    #[tokio::test]
    async fn web_outbound_is_stored_delivered_without_a_delivery_job() {
        let state = state();
        send_run_message(&state, Uuid::new_v4(), "u1", "web", "hello").await;

        let messages = state.message_store.by_channel("web");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].delivery_status, DeliveryStatus::Delivered);
        assert_eq!(state.queue_store.depth(QueueName::Messages), 0);
    }

    #[tokio::test]
    async fn discord_outbound_enqueues_delivery_then_ack_marks_delivered() {
        let state = state();
        send_run_message(&state, Uuid::new_v4(), "u1", "discord:4242", "hello").await;

        let messages = state.message_store.by_channel("discord:4242");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].delivery_status, DeliveryStatus::Pending);

        // Drain the delivery job; the logging adapter acks success.
        let job = state.queue_store.dequeue(QueueName::Messages).await.unwrap();
        assert_eq!(job.payload["provider"], "discord");
        assert_eq!(job.payload["payload"]["discordUserId"], "4242");
        handle_messages_job(&state, &job.payload).await.unwrap();

        let ack = state.queue_store.dequeue(QueueName::DeliveryAcks).await.unwrap();
        handle_delivery_ack(&state, &ack.payload).await.unwrap();

        let updated = state.message_store.get(messages[0].id).unwrap();
        assert_eq!(updated.delivery_status, DeliveryStatus::Delivered);
        assert!(updated.delivered_at.is_some());
    }

    #[tokio::test]
    async fn failed_ack_marks_message_failed() {
        let state = state();
        send_run_message(&state, Uuid::new_v4(), "u1", "discord:1", "hi").await;
        let message_id = state.message_store.by_channel("discord:1")[0].id;

        let payload = serde_json::json!({
            "type": "delivery_ack",
            "messageId": message_id,
            "status": "failed",
            "error": "rate limited",
        });
        handle_delivery_ack(&state, &payload).await.unwrap();
        assert_eq!(
            state.message_store.get(message_id).unwrap().delivery_status,
            DeliveryStatus::Failed
        );
    }

    #[tokio::test]
    async fn unknown_job_type_is_an_error() {
        let state = state();
        let payload = serde_json::json!({ "type": "mystery" });
        assert!(handle_messages_job(&state, &payload).await.is_err());
    }
}
