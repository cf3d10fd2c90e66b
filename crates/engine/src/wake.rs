//! Parent/child wake mechanics: `wakeParentRun`, `request_parent`, and
//! `reply_subagent`.

use chrono::Utc;
use sa_domain::entities::{Run, RunStatus};
use sa_queue::{Job, QueueName, QueueStore};
use sa_store::RunStore;
use uuid::Uuid;

/// A child run reached terminal state: wake its parent (`waiting -> pending`,
/// clear wake metadata) and enqueue a run job. Best-effort at-least-once —
/// if the parent already moved on, the status update is a no-op but the
/// enqueue still happens; the parent tolerates a spurious wake at its next
/// iteration-boundary status re-read.
pub async fn wake_parent_run(run_store: &RunStore, queue_store: &QueueStore, parent_run_id: Uuid) {
    run_store.update(parent_run_id, |r| {
        if r.status == RunStatus::Waiting {
            r.status = RunStatus::Pending;
            r.wake_at = None;
            r.wake_reason = None;
        }
    });
    let Some(parent) = run_store.get(parent_run_id) else {
        return;
    };
    let job = Job::new(
        QueueName::Runs,
        serde_json::json!({ "type": "run", "runId": parent_run_id, "tenantId": parent.tenant_id, "agentId": parent.agent_id }),
        Utc::now(),
    );
    queue_store.enqueue(job).await;
}

/// Fail a run: mark it `failed`, send the fallback user-visible error (for
/// non-subagent runs only), and record a `subagent_failed` event step on the
/// parent before waking it so the coordinator can retry, adapt, or finish
/// with a fallback.
pub async fn fail_run(
    run_store: &RunStore,
    queue_store: &QueueStore,
    run: &Run,
    reason: &str,
    user_message: Option<&str>,
) {
    run_store.update(run.id, |r| r.status = RunStatus::Failed);

    if run.parent_run_id.is_none() {
        if let Some(message) = user_message {
            let job = Job::new(
                QueueName::Messages,
                serde_json::json!({
                    "type": "outbound_message",
                    "runId": run.id,
                    "tenantId": run.tenant_id,
                    "channelId": run.channel_id,
                    "userId": run.user_id,
                    "message": message,
                }),
                Utc::now(),
            );
            queue_store.enqueue(job).await;
        }
    }

    if let Some(parent_id) = run.parent_run_id {
        run_store
            .append_step(
                parent_id,
                sa_domain::entities::RunStep::new(
                    parent_id,
                    sa_domain::entities::StepType::Message,
                    sa_domain::entities::StepStatus::Completed,
                    Uuid::new_v4().to_string(),
                )
                .with_result(serde_json::json!({
                    "event": "subagent_failed",
                    "runId": run.id,
                    "task": run.input_text,
                    "reason": reason,
                })),
            )
            .ok();
        wake_parent_run(run_store, queue_store, parent_id).await;
    }
}

pub enum RequestParentOutcome {
    /// Parent's inbox gained the message; child is now `waiting`.
    Requested,
    /// Same message as last time: deadlock-avoidance abort instead.
    Repeated,
}

/// Apply a `request_parent` command: append to the parent's inbox, wake it,
/// and put the child into `waiting_for_parent`. An identical repeated
/// message aborts the child instead of looping forever.
pub async fn request_parent(
    run_store: &RunStore,
    queue_store: &QueueStore,
    child: &Run,
    message: &str,
) -> RequestParentOutcome {
    if child.input_json.state.last_request_parent_message == message
        && !child.input_json.state.last_request_parent_message.is_empty()
    {
        return RequestParentOutcome::Repeated;
    }

    if let Some(parent_id) = child.parent_run_id {
        run_store.update(parent_id, |p| {
            p.input_json.state.push_inbox(child.id, message);
        });
        wake_parent_run(run_store, queue_store, parent_id).await;
    }

    run_store.update(child.id, |c| {
        c.status = RunStatus::Waiting;
        c.wake_reason = Some("waiting_for_parent".into());
        c.input_json.state.waiting_for_parent = true;
        c.input_json.state.last_request_parent_message = message.to_string();
    });
    RequestParentOutcome::Requested
}

/// Apply a `reply_subagent` command: append the reply to the child's inbox,
/// clear its waiting flag, and re-enqueue it.
pub async fn reply_subagent(run_store: &RunStore, queue_store: &QueueStore, from_run_id: Uuid, child_run_id: Uuid, message: &str) {
    run_store.update(child_run_id, |c| {
        c.input_json.state.push_inbox(from_run_id, message);
        c.input_json.state.waiting_for_parent = false;
        c.status = RunStatus::Pending;
        c.wake_reason = None;
        c.wake_at = None;
    });
    let Some(child) = run_store.get(child_run_id) else {
        return;
    };
    let job = Job::new(
        QueueName::Runs,
        serde_json::json!({ "type": "run", "runId": child_run_id, "tenantId": child.tenant_id, "agentId": child.agent_id }),
        Utc::now(),
    );
    queue_store.enqueue(job).await;
}
