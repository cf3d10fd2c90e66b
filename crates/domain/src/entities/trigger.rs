use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    RunWake,
}

/// Deferred wake, scanned by the trigger dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: TriggerType,
    pub spec_json: serde_json::Value,
    pub next_fire_at: DateTime<Utc>,
    pub enabled: bool,
}

impl Trigger {
    pub fn run_wake(agent_id: impl Into<String>, run_id: Uuid, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            kind: TriggerType::RunWake,
            spec_json: serde_json::json!({ "runId": run_id }),
            next_fire_at: fire_at,
            enabled: true,
        }
    }
}
