//! Job envelope shared by all five named queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the five durable queues the run engine and its collaborators push
/// into. Each is a FIFO with per-job delayed visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Runs,
    Messages,
    DeliveryAcks,
    MemoryWrites,
    Wake,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runs => "runs",
            Self::Messages => "messages",
            Self::DeliveryAcks => "delivery-acks",
            Self::MemoryWrites => "memory-writes",
            Self::Wake => "wake",
        }
    }

    pub const ALL: [QueueName; 5] = [
        QueueName::Runs,
        QueueName::Messages,
        QueueName::DeliveryAcks,
        QueueName::MemoryWrites,
        QueueName::Wake,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Failed,
}

/// A unit of work on a named queue. `payload` carries the queue-specific
/// body (a run id for `runs`/`wake`, a message id for `delivery-acks`, ...)
/// as opaque JSON so `sa-queue` does not depend on every producer crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    /// Becomes eligible for dequeue at or after this time.
    pub visible_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(queue: QueueName, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            payload,
            enqueued_at: now,
            visible_at: now,
            attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
        }
    }

    pub fn delayed(queue: QueueName, payload: serde_json::Value, now: DateTime<Utc>, visible_at: DateTime<Utc>) -> Self {
        Self {
            visible_at,
            ..Self::new(queue, payload, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_as_str_matches_named_queues() {
        assert_eq!(QueueName::Runs.as_str(), "runs");
        assert_eq!(QueueName::Messages.as_str(), "messages");
        assert_eq!(QueueName::DeliveryAcks.as_str(), "delivery-acks");
        assert_eq!(QueueName::MemoryWrites.as_str(), "memory-writes");
        assert_eq!(QueueName::Wake.as_str(), "wake");
    }

    #[test]
    fn new_job_is_immediately_visible() {
        let now = Utc::now();
        let job = Job::new(QueueName::Runs, serde_json::json!({"runId": "x"}), now);
        assert_eq!(job.visible_at, now);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn delayed_job_is_visible_only_after_fire_time() {
        let now = Utc::now();
        let fire_at = now + chrono::Duration::seconds(30);
        let job = Job::delayed(QueueName::Wake, serde_json::json!({}), now, fire_at);
        assert_eq!(job.visible_at, fire_at);
    }
}
