use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// Per-channel conversation entry. `metadata` carries channel-specific
/// fields (`source`, `runId`, Discord user id, `replyTo`) as an opaque
/// JSON blob rather than dedicated columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub user_id: String,
    pub channel_id: String,
    pub context_id: Option<String>,
    pub content: String,
    pub direction: Direction,
    pub delivery_status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            context_id: None,
            content: content.into(),
            direction: Direction::Inbound,
            delivery_status: DeliveryStatus::Delivered,
            delivered_at: Some(Utc::now()),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Outbound message from a run. Web channels are delivered synchronously
    /// (`deliveryStatus=delivered`); Discord requires a delivery job.
    pub fn outbound(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
        run_id: Uuid,
    ) -> Self {
        let channel_id = channel_id.into();
        let is_discord = channel_id.starts_with("discord:");
        let mut metadata = HashMap::new();
        metadata.insert("runId".into(), serde_json::json!(run_id));
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            channel_id,
            context_id: None,
            content: content.into(),
            direction: Direction::Outbound,
            delivery_status: if is_discord {
                DeliveryStatus::Pending
            } else {
                DeliveryStatus::Delivered
            },
            delivered_at: if is_discord { None } else { Some(Utc::now()) },
            metadata,
            created_at: Utc::now(),
        }
    }
}
