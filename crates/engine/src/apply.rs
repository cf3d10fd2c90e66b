//! Command application (iteration step 8): write steps, mutate the run, and
//! enqueue follow-on jobs for each of the 15 `RunCommand` shapes.

use std::collections::HashMap;

use chrono::Utc;
use sa_domain::command::{OutputMode, QueueAction, RunCommand};
use sa_domain::config::{PolicyDecision, RoleConfig, RunConfig, ToolPolicy};
use sa_domain::entities::{Run, RunRole, RunStatus, Trigger};
use sa_policy::{ApprovalStore, PolicyRequest};
use sa_providers::ProviderRegistry;
use sa_queue::{Job, QueueName, QueueStore};
use sa_store::{CancelMap, RunStore, TriggerStore};
use sa_tools::ToolRegistry;
use uuid::Uuid;

use crate::loop_guard::{LoopGuard, ToolLoopVerdict};
use crate::notes::{NoteOutcome, NoteTracker};
use crate::spawn;
use crate::steps::*;
use crate::validator::{self, ValidationDecision};
use crate::wake::{self, RequestParentOutcome};

/// What the iteration loop should do after a command was applied.
pub enum StepOutcome {
    /// Keep iterating.
    Continue,
    /// Keep iterating, but the command was a rewrite request or a block —
    /// it does not consume an iteration toward the terminal guards.
    ContinueUncounted,
    /// The run reached a terminal or suspended state; stop the loop.
    Stop,
}

/// Everything `apply_command` needs beyond the run/notes/loop-guard state
/// that the iteration loop already threads through by value. Bundled here
/// because the dependency list kept growing one parameter at a time.
pub struct ApplyContext<'a> {
    pub run_store: &'a RunStore,
    pub queue_store: &'a QueueStore,
    pub cancel_map: &'a CancelMap,
    pub trigger_store: &'a TriggerStore,
    pub tools: &'a ToolRegistry,
    pub config: &'a RunConfig,
    pub approvals: &'a ApprovalStore,
    pub registry: &'a ProviderRegistry,
    pub roles: &'a HashMap<String, RoleConfig>,
    /// The calling agent's own tool policy profile, combined with each
    /// tool's own `ToolDef::policy` at decision time.
    pub agent_tool_policy: &'a ToolPolicy,
}

fn merged_output(current: &str, output: &str, mode: OutputMode) -> String {
    match mode {
        OutputMode::Replace => output.to_string(),
        OutputMode::Append => {
            if current.is_empty() {
                output.to_string()
            } else {
                format!("{current}\n{output}")
            }
        }
    }
}

fn apply_output(run: &mut Run, output: &str, mode: OutputMode) {
    run.output_text = merged_output(&run.output_text, output, mode);
}

/// Record a blocked command: an `action_blocked` step, the system-note
/// counter feeding the auto-recovery detector, and the last-block context
/// replayed into the next prompt payload.
pub(crate) fn block(run_store: &RunStore, run_id: Uuid, reason: &str, detail: Option<&str>) {
    run_store
        .append_step(run_id, event_step(run_id, "action_blocked", serde_json::json!({ "reason": reason, "detail": detail })))
        .ok();
    run_store.update(run_id, |r| {
        r.input_json.state.system_note_count += 1;
        r.input_json.state.last_block_reason = Some(reason.to_string());
        r.input_json.state.last_block_detail = detail.map(|d| d.to_string());
    });
}

fn system_note(run_store: &RunStore, run_id: Uuid, content: &str) {
    run_store
        .append_step(run_id, event_step(run_id, "system_note", serde_json::json!({ "content": content })))
        .ok();
    run_store.update(run_id, |r| r.input_json.state.system_note_count += 1);
}

/// Validation gate shared by `send_message` (when it resembles a direct
/// answer), `set_output`, and `finish`. Returns `true` once the draft may be
/// finalised, `false` to hold the run for another turn (feedback was already
/// recorded as a step).
async fn validation_gate(
    ctx: &ApplyContext<'_>,
    run_id: Uuid,
    loop_guard: &mut LoopGuard,
    notes: &NoteTracker,
    draft: &str,
) -> bool {
    if loop_guard.is_repeat_validated_output(draft) {
        ctx.run_store
            .append_step(run_id, event_step(run_id, "validation_bypassed", serde_json::json!({ "reason": "repeated_output" })))
            .ok();
        return true;
    }

    let requirements = notes.requirements_text().unwrap_or_default();
    let plan = notes.plan_text().unwrap_or_default();
    let result = validator::validate_output(ctx.registry, ctx.roles, requirements, plan, draft).await;
    let attempts_before = ctx
        .run_store
        .get(run_id)
        .map(|r| r.input_json.state.validation_attempts)
        .unwrap_or(0);
    ctx.run_store.update(run_id, |r| r.input_json.state.validation_attempts += 1);

    let decision_text = match result.decision {
        ValidationDecision::Send => "send",
        ValidationDecision::Revise => "revise",
    };
    ctx.run_store
        .append_step(
            run_id,
            event_step(
                run_id,
                "validation_result",
                serde_json::json!({
                    "reason": "output_validation",
                    "decision": decision_text,
                    "feedback": result.feedback,
                    "retry": result.retry,
                }),
            ),
        )
        .ok();

    match result.decision {
        ValidationDecision::Send => {
            ctx.run_store.update(run_id, |r| r.input_json.state.last_validation_feedback = None);
            true
        }
        ValidationDecision::Revise => {
            ctx.run_store
                .update(run_id, |r| r.input_json.state.last_validation_feedback = result.feedback.clone());
            if result.retry && attempts_before + 1 < 2 {
                false
            } else {
                // When retries were requested and exhausted, record that;
                // otherwise the engine simply overrides the validator.
                let event = if result.retry { "validation_retry_exhausted" } else { "validation_override" };
                ctx.run_store.append_step(run_id, event_step(run_id, event, serde_json::json!({}))).ok();
                true
            }
        }
    }
}

/// Apply one parsed, role/budget-validated `RunCommand` against `run`.
///
/// `run` is the in-memory snapshot the iteration loop is working from; the
/// caller is responsible for re-reading from the store at the next
/// iteration boundary since spawn/wake paths may mutate other rows.
pub async fn apply_command(
    ctx: &ApplyContext<'_>,
    run: &mut Run,
    notes: &mut NoteTracker,
    loop_guard: &mut LoopGuard,
    command: &RunCommand,
) -> StepOutcome {
    let run_store = ctx.run_store;
    let queue_store = ctx.queue_store;
    let cancel_map = ctx.cancel_map;
    let run_id = run.id;
    let role = run.role();

    // Coordinators must complete the requirements/plan/artifact prelude
    // before any delegation or tool use. `finish` has its own gate with the
    // fabricated-notes escape hatch.
    if role == RunRole::Coordinator
        && !notes.prelude_complete()
        && matches!(
            command,
            RunCommand::ToolCall { .. } | RunCommand::SpawnSubagent { .. } | RunCommand::SpawnSubagents { .. }
        )
    {
        block(run_store, run_id, "notes_required", Some("record requirements, plan, and artifact notes first"));
        return StepOutcome::ContinueUncounted;
    }

    if command.is_action() {
        notes.consume_for_action();
    }

    match command {
        RunCommand::Note { category, content } => {
            match notes.record(*category, content, role, &run.input_text) {
                NoteOutcome::Accepted { plan_rewrite } => {
                    run_store.append_step(run_id, note_step(run_id, *category, content)).ok();
                    if plan_rewrite {
                        let rewrites = run_store
                            .get(run_id)
                            .map(|r| r.input_json.state.plan_rewrite_count)
                            .unwrap_or(0)
                            + 1;
                        run_store.update(run_id, |r| r.input_json.state.plan_rewrite_count = rewrites);
                        // The nudge stops after two rewrites.
                        if rewrites <= 2 {
                            run_store
                                .append_step(run_id, event_step(run_id, "plan_loop_detected", serde_json::json!({ "rewrites": rewrites })))
                                .ok();
                        }
                    }
                    if notes.consecutive_notes > 3 {
                        system_note(run_store, run_id, "Notes are piling up without an action; the next command must be an action.");
                    }
                    StepOutcome::Continue
                }
                NoteOutcome::RejectedShape { repeat } => {
                    if !repeat {
                        block(run_store, run_id, "note_rejected_shape", Some(content));
                    }
                    StepOutcome::ContinueUncounted
                }
                NoteOutcome::RejectedSimilar { repeat } => {
                    if !repeat {
                        block(run_store, run_id, "note_rejected_similar", Some(content));
                    }
                    StepOutcome::ContinueUncounted
                }
            }
        }

        RunCommand::Decision { content, importance } => {
            let importance_text = importance.as_ref().map(|i| format!("{i:?}").to_ascii_lowercase());
            run_store
                .append_step(run_id, decision_step(run_id, content, importance_text.as_deref()))
                .ok();
            StepOutcome::Continue
        }

        RunCommand::ToolCall { name, args } => {
            if !role.can_tool_call() {
                // Coordinator tool-call role violation: auto-spawn a
                // one-shot subagent to execute it instead.
                let spec = sa_domain::command::SubagentSpec {
                    profile: Some("auto_tool".into()),
                    task: format!("Call {name} with the given arguments and report the result."),
                    tools: Some(vec![name.clone()]),
                    context: Some(vec![sa_domain::entities::ContextMessage {
                        role: "system".into(),
                        content: serde_json::json!({ "tool": name, "args": args }).to_string(),
                    }]),
                    agent_level: Some(run.input_json.agent_level + 1),
                };
                let child_id = spawn::spawn_child(run_store, queue_store, cancel_map, run, &spec).await;
                run_store
                    .append_step(
                        run_id,
                        event_step(run_id, "auto_spawn_from_tool_call", serde_json::json!({ "tool": name, "args": args, "runId": child_id, "task": spec.task })),
                    )
                    .ok();
                run_store.update(run_id, |r| r.status = RunStatus::Waiting);
                spawn::schedule_watchdog(queue_store, run_id).await;
                return StepOutcome::Stop;
            }

            if let Some(allowed) = &run.allowed_tools {
                if !allowed.iter().any(|t| t == name) {
                    block(run_store, run_id, "tool_not_allowed", Some(name));
                    return StepOutcome::Continue;
                }
            }

            let signature = command.tool_signature().unwrap_or_default();
            if let ToolLoopVerdict::LoopDetected = loop_guard.record_tool_signature(&signature) {
                run_store
                    .append_step(run_id, event_step(run_id, "loop_detected", serde_json::json!({ "kind": "tool", "name": name })))
                    .ok();
                wake::fail_run(run_store, queue_store, run, "loop_detected", Some("Detected repeated tool call loop; stopping this run.")).await;
                return StepOutcome::Stop;
            }

            let (tool_name, command_name) = name.split_once('.').unwrap_or((name.as_str(), ""));
            let tool_policy = ctx.tools.get(tool_name).map(|t| t.policy.clone()).unwrap_or_default();
            let request = PolicyRequest {
                tenant_id: &run.tenant_id,
                agent_id: &run.agent_id,
                tool_name,
                command_name,
            };
            match sa_policy::decide(&request, &tool_policy, ctx.agent_tool_policy) {
                PolicyDecision::Deny => {
                    run_store.append_step(run_id, tool_call_step(run_id, name, args)).ok();
                    let result = serde_json::json!({ "error": "Denied by policy" });
                    run_store.append_step(run_id, tool_result_step(run_id, name, false, result)).ok();
                    block(run_store, run_id, "policy_denied", Some(name));
                    return StepOutcome::Continue;
                }
                PolicyDecision::Approve => {
                    let pending = ctx.approvals.insert(run_id, run.tenant_id.clone(), run.agent_id.clone(), name.clone(), command_name.to_string(), args.clone());
                    run_store
                        .append_step(run_id, event_step(run_id, "approval_required", serde_json::json!({ "approvalId": pending.id, "tool": name })))
                        .ok();
                    run_store.update(run_id, |r| r.status = RunStatus::Waiting);
                    return StepOutcome::Stop;
                }
                PolicyDecision::Allow => {}
            }

            run_store.append_step(run_id, tool_call_step(run_id, name, args)).ok();

            let ctx_tool = sa_tools::ToolContext {
                tenant_id: run.tenant_id.clone(),
                agent_id: run.agent_id.clone(),
                run_id,
                user_id: Some(run.user_id.clone()),
                channel_id: Some(run.channel_id.clone()),
                tool_config: None,
            };
            let outcome = ctx.tools.dispatch(&ctx_tool, name, args.clone()).await;
            let (success, result_json) = match outcome {
                Ok(o) => (o.success, serde_json::to_value(&o).unwrap_or(serde_json::Value::Null)),
                Err(e) => (false, serde_json::json!({ "error": e.to_string() })),
            };
            run_store.append_step(run_id, tool_result_step(run_id, name, success, result_json.clone())).ok();

            let result_signature = format!("{signature}:{result_json}");
            if loop_guard.record_tool_result_signature(&result_signature) {
                run_store.update(run_id, |r| r.input_json.state.limitation_required = true);
            }
            if !success {
                let failures = loop_guard.record_tool_failure(name);
                if crate::budget::exceeds_tool_retries(failures, ctx.config) {
                    run_store.update(run_id, |r| r.input_json.state.limitation_required = true);
                }
            }
            StepOutcome::Continue
        }

        RunCommand::SendMessage { message } => {
            if !role.can_send_user_message() {
                block(run_store, run_id, "role_violation", Some("send_message"));
                return StepOutcome::Continue;
            }
            if crate::similarity::resembles_direct_answer(message) {
                let proceed = validation_gate(ctx, run_id, loop_guard, notes, message).await;
                if !proceed {
                    return StepOutcome::Continue;
                }
            }
            run_store.append_step(run_id, assistant_message_step(run_id, message)).ok();
            let delivery = Job::new(
                QueueName::Messages,
                serde_json::json!({
                    "type": "outbound_message",
                    "runId": run_id,
                    "tenantId": run.tenant_id,
                    "channelId": run.channel_id,
                    "userId": run.user_id,
                    "message": message,
                }),
                Utc::now(),
            );
            queue_store.enqueue(delivery).await;
            StepOutcome::Continue
        }

        RunCommand::SetOutput { output, mode } => {
            let draft = merged_output(&run.output_text, output, *mode);
            let proceed = validation_gate(ctx, run_id, loop_guard, notes, &draft).await;
            if !proceed {
                return StepOutcome::Continue;
            }
            apply_output(run, output, *mode);
            run_store.update(run_id, |r| apply_output(r, output, *mode));
            run_store
                .append_step(run_id, output_update_step(run_id, output, &format!("{mode:?}").to_ascii_lowercase()))
                .ok();
            StepOutcome::Continue
        }

        RunCommand::SetRunLimits { .. } => {
            // Fully honoured by the iteration driver before apply runs: the
            // ceiling is a loop-local variable there, and the driver records
            // the `budget_decision` step itself.
            StepOutcome::Continue
        }

        RunCommand::QueueOp { action, items } => {
            if role != RunRole::Coordinator {
                block(run_store, run_id, "role_violation", Some("queue_op"));
                return StepOutcome::Continue;
            }
            run_store.update(run_id, |r| match action {
                QueueAction::Push => r.input_json.state.queue.extend(items.clone()),
                QueueAction::Shift => {
                    if !r.input_json.state.queue.is_empty() {
                        r.input_json.state.queue.remove(0);
                    }
                }
                QueueAction::Clear => r.input_json.state.queue.clear(),
                QueueAction::Set => r.input_json.state.queue = items.clone(),
            });
            StepOutcome::Continue
        }

        RunCommand::SpawnSubagent { subagent } => {
            apply_spawns(ctx, run, loop_guard, std::slice::from_ref(subagent)).await
        }

        RunCommand::SpawnSubagents { subagents } => {
            apply_spawns(ctx, run, loop_guard, subagents).await
        }

        RunCommand::RequestParent { message } => {
            if role == RunRole::Coordinator {
                block(run_store, run_id, "role_violation", Some("request_parent"));
                return StepOutcome::Continue;
            }
            match wake::request_parent(run_store, queue_store, run, message).await {
                RequestParentOutcome::Requested => StepOutcome::Stop,
                RequestParentOutcome::Repeated => {
                    run_store
                        .append_step(run_id, event_step(run_id, "finish_blocked", serde_json::json!({ "reason": "request_parent_repeat" })))
                        .ok();
                    run_store.update(run_id, |r| r.input_json.state.request_parent_repeat_count += 1);
                    wake::fail_run(run_store, queue_store, run, "request_parent_repeat", None).await;
                    StepOutcome::Stop
                }
            }
        }

        RunCommand::ReplySubagent { run_id: child_id, message } => {
            if role == RunRole::Subsubagent {
                block(run_store, run_id, "role_violation", Some("reply_subagent"));
                return StepOutcome::Continue;
            }
            wake::reply_subagent(run_store, queue_store, run_id, *child_id, message).await;
            StepOutcome::Continue
        }

        RunCommand::RetrySubagent { run_id: child_id, feedback } => {
            run_store.update(*child_id, |c| {
                c.status = RunStatus::Pending;
                c.input_json.state.push_inbox(run_id, format!("retry: {feedback}"));
            });
            if let Some(child) = run_store.get(*child_id) {
                let job = Job::new(
                    QueueName::Runs,
                    serde_json::json!({ "type": "run", "runId": child_id, "tenantId": child.tenant_id, "agentId": child.agent_id }),
                    Utc::now(),
                );
                queue_store.enqueue(job).await;
            }
            StepOutcome::Continue
        }

        RunCommand::DeliverSubagentOutput { run_id: child_id } => {
            if let Some(child) = run_store.get(*child_id) {
                run_store
                    .append_step(run_id, event_step(run_id, "deliver_subagent_output", serde_json::json!({ "runId": child_id, "output": child.output_text })))
                    .ok();
            }
            StepOutcome::Continue
        }

        RunCommand::Sleep { reason, wake_at, delay_seconds, cron } => {
            let valid = if role == RunRole::Coordinator {
                run.input_json.state.queue.is_empty()
                    && run_store.children(run_id).iter().any(|c| !c.status.is_terminal())
            } else {
                run.input_json.state.waiting_for_parent
            };
            if !valid {
                block(run_store, run_id, "sleep_invalid", reason.as_deref());
                return StepOutcome::Continue;
            }

            // Cron sleeps go through a trigger row the dispatcher scans;
            // concrete times go straight onto the wake queue as a delayed job.
            if let Some(cron) = cron {
                let Some(next) = crate::trigger::cron_next(cron, &Utc::now()) else {
                    block(run_store, run_id, "sleep_invalid_cron", Some(cron));
                    return StepOutcome::Continue;
                };
                ctx.trigger_store.insert(Trigger::run_wake(&run.agent_id, run_id, next));
                run_store.update(run_id, |r| {
                    r.status = RunStatus::Waiting;
                    r.wake_at = Some(next);
                    r.wake_reason = reason.clone();
                });
                return StepOutcome::Stop;
            }

            let Some(fire_at) = wake_at.or_else(|| delay_seconds.map(|d| Utc::now() + chrono::Duration::seconds(d as i64)))
            else {
                block(run_store, run_id, "sleep_invalid", Some("no wake time given"));
                return StepOutcome::Continue;
            };
            run_store.update(run_id, |r| {
                r.status = RunStatus::Waiting;
                r.wake_at = Some(fire_at);
                r.wake_reason = reason.clone();
            });
            let job = Job::delayed(
                QueueName::Wake,
                serde_json::json!({ "type": "wake", "runId": run_id, "reason": reason }),
                Utc::now(),
                fire_at,
            );
            queue_store.enqueue(job).await;
            StepOutcome::Stop
        }

        RunCommand::Finish { output, mode } => {
            if !(notes.has_requirements() && notes.has_plan()) {
                let should_fabricate = notes.record_blocked_finish();
                run_store
                    .append_step(run_id, event_step(run_id, "finish_blocked", serde_json::json!({ "reason": "missing_notes" })))
                    .ok();
                if run.is_coordinator() && should_fabricate {
                    notes.fabricate_fallback(&run.input_text);
                } else {
                    return StepOutcome::Continue;
                }
            }
            if !notes.has_validation() {
                // Encouraged, not required: recorded and moved past.
                run_store.append_step(run_id, validation_missing_step(run_id, "validation")).ok();
            }

            let draft = match output {
                Some(o) => merged_output(&run.output_text, o, *mode),
                None => run.output_text.clone(),
            };
            if loop_guard.repeats_last_finish(&draft) {
                run_store
                    .append_step(run_id, event_step(run_id, "finish_repeat_forced", serde_json::json!({})))
                    .ok();
            } else {
                let proceed = validation_gate(ctx, run_id, loop_guard, notes, &draft).await;
                if !proceed {
                    return StepOutcome::Continue;
                }
            }

            run_store.append_step(run_id, finish_step(run_id, &draft)).ok();
            run_store.update(run_id, |r| {
                apply_output(r, &draft, OutputMode::Replace);
                r.status = RunStatus::Completed;
            });
            run.output_text = draft.clone();
            run.status = RunStatus::Completed;

            if run.is_coordinator() {
                run_store.cascade_cancel(run_id);
                for child_id in run_store.children(run_id).into_iter().map(|c| c.id) {
                    cancel_map.cancel(child_id);
                }
                let delivery = Job::new(
                    QueueName::Messages,
                    serde_json::json!({
                        "type": "outbound_message",
                        "runId": run_id,
                        "tenantId": run.tenant_id,
                        "channelId": run.channel_id,
                        "userId": run.user_id,
                        "message": draft,
                    }),
                    Utc::now(),
                );
                queue_store.enqueue(delivery).await;
            }
            if let Some(parent_id) = run.parent_run_id {
                wake::wake_parent_run(run_store, queue_store, parent_id).await;
            }
            StepOutcome::Stop
        }
    }
}

async fn apply_spawns(
    ctx: &ApplyContext<'_>,
    run: &mut Run,
    loop_guard: &mut LoopGuard,
    specs: &[sa_domain::command::SubagentSpec],
) -> StepOutcome {
    let run_store = ctx.run_store;
    let queue_store = ctx.queue_store;
    let cancel_map = ctx.cancel_map;
    let run_id = run.id;
    if !run.role().can_spawn() {
        block(run_store, run_id, "role_violation", Some("spawn_subagent"));
        return StepOutcome::Continue;
    }
    if run.input_json.allow_subagents != Some(true) {
        run_store
            .append_step(run_id, event_step(run_id, "spawn_blocked", serde_json::json!({ "reason": "allow_subagents is false" })))
            .ok();
        block(run_store, run_id, "spawn_blocked", Some("allow_subagents is false"));
        run_store.update(run_id, |r| r.input_json.state.blocked_spawn_count += 1);
        return StepOutcome::Continue;
    }

    let mut children = Vec::new();
    let mut any_blocked = false;
    for spec in specs {
        let signature = spawn::spawn_signature(spec);
        let key = spawn::historical_spawn_key(spec.profile.as_deref(), &spec.task);
        if loop_guard.is_duplicate_spawn(&signature, &key) {
            any_blocked = true;
            run_store.update(run_id, |r| r.input_json.state.blocked_spawn_count += 1);
            run_store
                .append_step(run_id, event_step(run_id, "loop_detected", serde_json::json!({ "kind": "spawn", "task": spec.task })))
                .ok();
            continue;
        }
        let child_id = spawn::spawn_child(run_store, queue_store, cancel_map, run, spec).await;
        children.push(serde_json::json!({ "runId": child_id, "task": spec.task, "profile": spec.profile }));
    }

    if children.is_empty() {
        if any_blocked {
            let blocked_attempts = run_store
                .get(run_id)
                .map(|r| r.input_json.state.blocked_spawn_count)
                .unwrap_or(0);
            if blocked_attempts >= 2 {
                if run.is_coordinator() {
                    // Ask the user rather than spin on the same delegation.
                    run_store
                        .append_step(run_id, event_step(run_id, "finish_blocked", serde_json::json!({ "reason": "duplicate_spawn", "clarify": true })))
                        .ok();
                    let clarify = Job::new(
                        QueueName::Messages,
                        serde_json::json!({
                            "type": "outbound_message",
                            "runId": run_id,
                            "tenantId": run.tenant_id,
                            "channelId": run.channel_id,
                            "userId": run.user_id,
                            "message": "I keep arriving at the same delegation without progress — could you clarify what you need?",
                        }),
                        Utc::now(),
                    );
                    queue_store.enqueue(clarify).await;
                } else {
                    run_store.update(run_id, |r| r.status = RunStatus::Completed);
                    run_store
                        .append_step(run_id, finish_step(run_id, "Unable to make progress: repeated identical delegation attempt."))
                        .ok();
                    if let Some(parent_id) = run.parent_run_id {
                        wake::wake_parent_run(run_store, queue_store, parent_id).await;
                    }
                    return StepOutcome::Stop;
                }
            }
        }
        return StepOutcome::Continue;
    }

    run_store
        .append_step(
            run_id,
            event_step(run_id, "spawn_subagents", serde_json::json!({ "subagents": children, "specs": specs })),
        )
        .ok();
    run_store.update(run_id, |r| r.status = RunStatus::Waiting);
    spawn::schedule_watchdog(queue_store, run_id).await;
    StepOutcome::Stop
}

/// Coordinator auto-recovery: spawns one generic recovery subagent when the
/// coordinator is clearly stuck and has no active children. At most once
/// per run.
pub async fn maybe_auto_recover(
    run_store: &RunStore,
    queue_store: &QueueStore,
    cancel_map: &CancelMap,
    run: &Run,
) -> bool {
    // The caller's snapshot may lag behind the counters `block` writes
    // straight to the store; re-read before deciding.
    let Some(run) = run_store.get(run.id) else {
        return false;
    };
    let run = &run;
    if !run.is_coordinator() || run.input_json.state.auto_recovery_spawned {
        return false;
    }
    let stuck = run.input_json.state.system_note_count >= 3
        || run.input_json.state.plan_rewrite_count >= 2
        || run.input_json.state.blocked_spawn_count >= 1;
    if !stuck {
        return false;
    }
    let has_active_children = run_store
        .children(run.id)
        .iter()
        .any(|c| !c.status.is_terminal());
    if has_active_children {
        return false;
    }

    let spec = sa_domain::command::SubagentSpec {
        profile: Some("recovery".into()),
        task: format!("Make progress on: {}", run.input_text),
        tools: None,
        context: None,
        agent_level: Some(run.input_json.agent_level + 1),
    };
    spawn::spawn_child(run_store, queue_store, cancel_map, run, &spec).await;
    run_store.update(run.id, |r| {
        r.input_json.state.auto_recovery_spawned = true;
        r.status = RunStatus::Waiting;
    });
    spawn::schedule_watchdog(queue_store, run.id).await;
    true
}
