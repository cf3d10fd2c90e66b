//! Queue consumers: one bounded loop per named queue plus the trigger
//! dispatcher tick. Shutdown is cooperative — cancelling the token stops
//! new dispatches while in-flight jobs finish inside the drain window.

use std::sync::Arc;

use sa_domain::entities::{Message as StoredMessage, RunStatus};
use sa_engine::trigger::TriggerDispatcher;
use sa_queue::{Job, QueueName, WorkerPool};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::delivery;
use crate::state::AppState;

/// Spawn every consumer loop and await them until `token` is cancelled.
pub async fn run(state: Arc<AppState>, token: CancellationToken) {
    let pool = Arc::new(WorkerPool::new(state.config.run.worker_concurrency as usize));
    let mut handles = Vec::new();

    for queue in QueueName::ALL {
        let state = state.clone();
        let pool = pool.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = dispatch_next(&pool, &state, queue) => {}
                }
            }
        }));
    }

    {
        let state = state.clone();
        let token = token.clone();
        handles.push(tokio::spawn(trigger_loop(state, token)));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

/// Idle backoff when a queue has nothing visible; keeps the poll loop from
/// spinning against an empty `DelayQueue`.
const IDLE_POLL_MS: u64 = 50;

async fn dispatch_next(pool: &WorkerPool, state: &Arc<AppState>, queue: QueueName) {
    let state_for_job = state.clone();
    let dispatched = pool
        .dispatch_one(&state.queue_store, queue, move |job| async move {
            handle_job(state_for_job, queue, job).await
        })
        .await;
    if !dispatched {
        tokio::time::sleep(std::time::Duration::from_millis(IDLE_POLL_MS)).await;
    }
}

async fn handle_job(state: Arc<AppState>, queue: QueueName, job: Job) -> Result<(), String> {
    match queue {
        QueueName::Runs => {
            let run_id = payload_run_id(&job.payload)?;
            state.engine.claim_and_run(run_id).await;
            Ok(())
        }
        QueueName::Wake => handle_wake(&state, &job.payload).await,
        QueueName::MemoryWrites => handle_memory_write(&state, &job.payload).await,
        QueueName::Messages => delivery::handle_messages_job(&state, &job.payload).await,
        QueueName::DeliveryAcks => delivery::handle_delivery_ack(&state, &job.payload).await,
    }
}

fn payload_run_id(payload: &serde_json::Value) -> Result<Uuid, String> {
    payload
        .get("runId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing field 'runId'".to_string())?
        .parse::<Uuid>()
        .map_err(|e| e.to_string())
}

/// A wake job moves a `waiting` run back to `pending` and re-enqueues it.
/// Wakes are at-least-once: a run that already moved on just gets a spare
/// run job whose claim is rejected.
pub async fn handle_wake(state: &Arc<AppState>, payload: &serde_json::Value) -> Result<(), String> {
    let run_id = payload_run_id(payload)?;
    let Some(run) = state.run_store.get(run_id) else {
        return Ok(());
    };
    if run.status.is_terminal() {
        return Ok(());
    }
    state.run_store.update(run_id, |r| {
        if r.status == RunStatus::Waiting {
            r.status = RunStatus::Pending;
            r.wake_at = None;
            r.wake_reason = None;
        }
    });
    let job = Job::new(
        QueueName::Runs,
        serde_json::json!({ "type": "run", "runId": run_id, "tenantId": run.tenant_id, "agentId": run.agent_id }),
        chrono::Utc::now(),
    );
    state.queue_store.enqueue(job).await;
    Ok(())
}

/// A memory-write job distills durable memories from a message segment:
/// either the one carried in the payload or the context's recent tail.
/// Writer skips (memory disabled, missing/invalid key) are recorded, never
/// failed.
pub async fn handle_memory_write(state: &Arc<AppState>, payload: &serde_json::Value) -> Result<(), String> {
    let user_id = payload
        .get("userId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing field 'userId'".to_string())?;
    let context_id = payload.get("contextId").and_then(|v| v.as_str()).unwrap_or_default();

    let segment: Vec<StoredMessage> = match payload.get("segmentMessages").and_then(|v| v.as_array()) {
        Some(items) => items
            .iter()
            .filter_map(|item| item.get("content").and_then(|c| c.as_str()))
            .map(|content| StoredMessage::inbound(user_id, context_id, content))
            .collect(),
        None => {
            let max = state.config.run.memory_writer_max_messages as usize;
            let mut messages = state.message_store.by_context(context_id);
            if messages.len() > max {
                messages = messages.split_off(messages.len() - max);
            }
            messages
        }
    };

    let settings = state.user_settings.get(user_id);
    match sa_memory::run_writer(
        &state.memory_store,
        &state.llm,
        &state.config.llm.roles,
        &settings,
        &*state.decryptor,
        &segment,
    )
    .await
    {
        Ok(summary) => {
            tracing::info!(
                user_id = %user_id,
                applied = summary.applied,
                skipped = summary.skipped,
                archived = summary.archived,
                "memory write pass complete"
            );
            Ok(())
        }
        Err(skip) => {
            tracing::info!(user_id = %user_id, reason = ?skip, "memory write skipped");
            Ok(())
        }
    }
}

/// Resolve a pending tool approval and re-drive the suspended run. The
/// decision lands in the run's transcript as an `approval_resolved` event,
/// so the next planner iteration sees what was (dis)allowed.
pub async fn resolve_approval(
    state: &Arc<AppState>,
    approval_id: Uuid,
    decision: sa_policy::ApprovalDecision,
) -> Result<(), String> {
    let pending = state
        .approvals
        .resolve(approval_id, decision.clone())
        .map_err(|e| e.to_string())?;
    let step = sa_domain::entities::RunStep::new(
        pending.run_id,
        sa_domain::entities::StepType::Message,
        sa_domain::entities::StepStatus::Completed,
        Uuid::new_v4().to_string(),
    )
    .with_result(serde_json::json!({
        "event": "approval_resolved",
        "approvalId": approval_id,
        "tool": format!("{}.{}", pending.tool_name, pending.command_name),
        "decision": decision,
    }));
    state.run_store.append_step(pending.run_id, step).ok();
    handle_wake(state, &serde_json::json!({ "runId": pending.run_id })).await
}

async fn trigger_loop(state: Arc<AppState>, token: CancellationToken) {
    let dispatcher = TriggerDispatcher::new();
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(
        state.config.run.trigger_poll_interval_ms,
    ));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                dispatcher.tick(&state.trigger_store, &state.run_store, &state.queue_store).await;
            }
        }
    }
}
