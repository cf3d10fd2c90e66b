//! Spawn and wake: `spawn_subagent(s)`, the coordinator tool-call auto-spawn
//! path, and the watchdog wake it schedules.
//!
//! A spawned child is registered in the parent's cancel group and runs to
//! its own terminal state off the `runs` queue; nothing here blocks on the
//! child.

use chrono::{Duration, Utc};
use sa_domain::command::SubagentSpec;
use sa_domain::entities::{ContextMessage, Run};
use sa_queue::{Job, QueueName, QueueStore};
use sa_store::{CancelMap, RunStore};
use uuid::Uuid;

/// Watchdog wake delay for a coordinator after spawning subagents.
pub const SUBAGENT_WATCHDOG_SECONDS: i64 = 30;

/// A stable signature over the fields that make two spawns "the same
/// request", used by the duplicate-spawn loop detector.
pub fn spawn_signature(spec: &SubagentSpec) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        spec.profile.as_deref().unwrap_or(""),
        spec.task,
        spec.tools.as_ref().map(|t| t.join(",")).unwrap_or_default(),
        spec.context
            .as_ref()
            .map(|c| c.iter().map(|m| format!("{}={}", m.role, m.content)).collect::<Vec<_>>().join(";"))
            .unwrap_or_default(),
        spec.agent_level.unwrap_or(0),
    )
}

/// The `profile:task` key used to match a spawn request against historical
/// `spawn_subagents` event steps, which don't retain tools/context.
pub fn historical_spawn_key(profile: Option<&str>, task: &str) -> String {
    format!("{}:{}", profile.unwrap_or(""), task)
}

/// Fill in context the coordinator/subagent omitted: a summary of the
/// request, and (when the task text hints at it) a tool-usage note, output
/// format, and success-criteria line — so a spawned child never starts with
/// fewer instructions than its parent had.
pub fn normalize_context(parent_task: &str, spec: &SubagentSpec) -> Vec<ContextMessage> {
    let mut context = spec.context.clone().unwrap_or_default();
    if context.is_empty() || !context.iter().any(|m| m.role == "user") {
        context.insert(
            0,
            ContextMessage {
                role: "user".into(),
                content: format!("Original request: {parent_task}"),
            },
        );
    }
    if crate::similarity::task_hints_at_tools(&spec.task)
        && !context.iter().any(|m| m.content.to_ascii_lowercase().contains("tool"))
    {
        context.push(ContextMessage {
            role: "system".into(),
            content: "This task likely requires at least one tool call before finishing.".into(),
        });
    }
    if !context.iter().any(|m| m.content.to_ascii_lowercase().contains("format")) {
        context.push(ContextMessage {
            role: "system".into(),
            content: "Output format: plain text suitable for direct relay to the requester."
                .into(),
        });
    }
    if !context.iter().any(|m| m.content.to_ascii_lowercase().contains("success")) {
        context.push(ContextMessage {
            role: "system".into(),
            content: "Success criteria: the task description is fully satisfied.".into(),
        });
    }
    context
}

/// Insert one child run for `spec`, enqueue its run job, and register it
/// under `parent`'s cancel group. Returns the new run id.
pub async fn spawn_child(
    run_store: &RunStore,
    queue_store: &QueueStore,
    cancel_map: &CancelMap,
    parent: &Run,
    spec: &SubagentSpec,
) -> Uuid {
    let agent_level = spec.agent_level.unwrap_or(parent.input_json.agent_level + 1);
    let context = normalize_context(&parent.input_text, spec);
    let child = Run::new_child(
        parent,
        spec.profile.clone(),
        spec.task.clone(),
        spec.tools.clone(),
        context,
        agent_level,
    );
    let child_id = run_store.insert(child);
    cancel_map.add_to_group(parent.id, child_id);

    let job = Job::new(
        QueueName::Runs,
        serde_json::json!({ "type": "run", "runId": child_id, "tenantId": parent.tenant_id, "agentId": parent.agent_id }),
        Utc::now(),
    );
    queue_store.enqueue(job).await;
    child_id
}

/// After a `spawn_subagent(s)` command: the spawning run becomes `waiting`
/// and gets a watchdog wake scheduled via the `wake` queue.
pub async fn schedule_watchdog(queue_store: &QueueStore, run_id: Uuid) {
    let fire_at = Utc::now() + Duration::seconds(SUBAGENT_WATCHDOG_SECONDS);
    let job = Job::delayed(
        QueueName::Wake,
        serde_json::json!({ "type": "wake", "runId": run_id, "reason": "subagent_watchdog" }),
        Utc::now(),
        fire_at,
    );
    queue_store.enqueue(job).await;
}
