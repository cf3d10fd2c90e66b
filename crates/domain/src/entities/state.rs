use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One parent↔child message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub from_run_id: Uuid,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Embedded inside `inputJson.state`. Rewritten in full whenever the owning
/// run row is updated — never partial patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunState {
    #[serde(default)]
    pub queue: Vec<String>,
    #[serde(default)]
    pub inbox: Vec<InboxEntry>,
    #[serde(default)]
    pub waiting_for_parent: bool,
    #[serde(default)]
    pub auto_recovery_spawned: bool,
    #[serde(default)]
    pub last_request_parent_message: String,
    #[serde(default)]
    pub request_parent_repeat_count: u32,
    #[serde(default)]
    pub last_block_reason: Option<String>,
    #[serde(default)]
    pub last_block_detail: Option<String>,

    // Counters feeding the anti-loop detectors, kept durable across
    // iterations so they don't need to be re-derived from the step log
    // on every claim.
    #[serde(default)]
    pub system_note_count: u32,
    #[serde(default)]
    pub plan_rewrite_count: u32,
    #[serde(default)]
    pub blocked_spawn_count: u32,
    #[serde(default)]
    pub budget_strikes: u32,
    #[serde(default)]
    pub validation_attempts: u32,
    #[serde(default)]
    pub limitation_required: bool,
    /// Most recent validator feedback, replayed into the next iteration's
    /// prompt payload so the agent can revise.
    #[serde(default)]
    pub last_validation_feedback: Option<String>,
}

impl RunState {
    pub fn push_inbox(&mut self, from_run_id: Uuid, message: impl Into<String>) {
        self.inbox.push(InboxEntry {
            from_run_id,
            message: message.into(),
            at: Utc::now(),
        });
    }
}
