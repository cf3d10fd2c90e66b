//! `RunEngine`: claims a pending run and drives it through the iteration
//! loop (status re-read, runtime ceiling, budget check, LLM request, parse,
//! role/budget validation, apply, loop detection, terminal check) until it
//! reaches a terminal or suspended state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sa_domain::command::{parse_command, RunCommand};
use sa_domain::config::{AgentConfig, RoleConfig, RunConfig, ToolPolicy};
use sa_domain::entities::{Run, RunRole, RunStatus, RunStep, StepStatus, StepType};
use sa_policy::ApprovalStore;
use sa_providers::{chat_with_fallback, ChatRequest, ProviderRegistry};
use sa_queue::QueueStore;
use sa_store::{CancelMap, MemoryStore, MessageStore, RunStore, TriggerStore};
use sa_tools::ToolRegistry;
use serde_json::Value;
use uuid::Uuid;

use crate::apply::{self, ApplyContext, StepOutcome};
use crate::budget;
use crate::loop_guard::{IterationSnapshot, LoopGuard};
use crate::notes::NoteTracker;
use crate::prompt;
use crate::steps::event_step;

/// Role string used to look up the planner model in `llm.roles`; every
/// agent role (coordinator/subagent/subsubagent) shares one entry since the
/// prompt, not the model, is what changes per role.
const PLANNER_ROLE: &str = "planner";

/// Memories surfaced per level in the prompt payload.
const MEMORIES_PER_LEVEL: usize = 5;

/// Conversation window for subagents; coordinators see the full channel.
const SUBAGENT_CONVERSATION_WINDOW: usize = 40;

pub struct RunEngine {
    pub run_store: Arc<RunStore>,
    pub message_store: Arc<MessageStore>,
    pub memory_store: Arc<MemoryStore>,
    pub trigger_store: Arc<TriggerStore>,
    pub queue_store: Arc<QueueStore>,
    pub cancel_map: Arc<CancelMap>,
    pub tools: Arc<ToolRegistry>,
    pub config: RunConfig,
    pub approvals: Arc<ApprovalStore>,
    pub registry: Arc<ProviderRegistry>,
    pub roles: HashMap<String, RoleConfig>,
    pub agent_profiles: HashMap<String, AgentConfig>,
}

impl RunEngine {
    fn agent_policy(&self, run: &Run) -> ToolPolicy {
        run.profile
            .as_deref()
            .and_then(|p| self.agent_profiles.get(p))
            .map(|a| a.tool_policy.clone())
            .unwrap_or_default()
    }

    /// The last N transcript entries, newest-first capped by the entry
    /// limit and then by the token-estimate budget (4 chars ≈ 1 token).
    fn transcript_tail(&self, run_id: Uuid) -> Vec<Value> {
        let steps = self.run_store.steps(run_id);
        let token_limit = self.config.run_transcript_token_limit as usize;
        let mut tokens = 0usize;
        let mut tail: Vec<Value> = Vec::new();
        for step in steps.iter().rev().take(self.config.run_transcript_limit as usize) {
            let value = serde_json::to_value(step).unwrap_or(Value::Null);
            let estimate = value.to_string().len() / 4;
            if !tail.is_empty() && tokens + estimate > token_limit {
                break;
            }
            tokens += estimate;
            tail.push(value);
        }
        tail.reverse();
        tail
    }

    /// Channel conversation: full for coordinators, the last 40 messages
    /// for subagents.
    fn conversation_window(&self, run: &Run, role: RunRole) -> Vec<Value> {
        let mut messages = self.message_store.by_channel(&run.channel_id);
        if role != RunRole::Coordinator && messages.len() > SUBAGENT_CONVERSATION_WINDOW {
            messages = messages.split_off(messages.len() - SUBAGENT_CONVERSATION_WINDOW);
        }
        messages
            .iter()
            .map(|m| serde_json::json!({ "direction": m.direction, "content": m.content, "at": m.created_at }))
            .collect()
    }

    /// Top memories per level, most recently seen first, each value
    /// truncated to its level's character cap.
    fn load_memories(&self, user_id: &str) -> Vec<Value> {
        let mut items = self.memory_store.by_user(user_id);
        items.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        let mut per_level: HashMap<u8, usize> = HashMap::new();
        let mut out = Vec::new();
        for item in items {
            let count = per_level.entry(item.level).or_insert(0);
            if *count >= MEMORIES_PER_LEVEL {
                continue;
            }
            *count += 1;
            let (_, max_chars) = sa_domain::entities::level_caps(item.level);
            let value: String = item.value.chars().take(max_chars).collect();
            out.push(serde_json::json!({ "level": item.level, "module": item.module, "key": item.key, "value": value }));
        }
        out
    }

    fn subagent_results(&self, run_id: Uuid) -> Vec<Value> {
        self.run_store
            .children(run_id)
            .iter()
            .filter(|c| c.status.is_terminal())
            .map(|c| serde_json::json!({ "runId": c.id, "task": c.input_text, "status": c.status, "output": c.output_text }))
            .collect()
    }

    /// Seed the loop guard with spawn keys from historical `spawn_subagents`
    /// event steps, so a re-claimed parent can't re-issue an old delegation.
    fn seed_loop_guard(&self, run_id: Uuid, guard: &mut LoopGuard) {
        for step in self.run_store.steps(run_id) {
            let Some(result) = step.result_json.as_ref() else { continue };
            if result.get("event").and_then(|e| e.as_str()) != Some("spawn_subagents") {
                continue;
            }
            let Some(subagents) = result.get("subagents").and_then(|s| s.as_array()) else { continue };
            for sub in subagents {
                let profile = sub.get("profile").and_then(|p| p.as_str());
                let task = sub.get("task").and_then(|t| t.as_str()).unwrap_or_default();
                guard.seed_historical_spawn(&crate::spawn::historical_spawn_key(profile, task));
            }
        }
    }

    /// Claim `run_id` and drive it to a terminal or suspended state.
    pub async fn claim_and_run(&self, run_id: Uuid) {
        let token = self.cancel_map.register(run_id);
        let mut run = match self.run_store.claim(run_id) {
            Ok(run) => run,
            Err(err) => {
                tracing::debug!(run_id = %run_id, error = %err, "run claim rejected");
                self.cancel_map.remove(run_id);
                return;
            }
        };

        let started_at = Instant::now();
        let mut run_iteration_limit = budget::initial_iteration_limit(&self.config);
        let mut iteration: u32 = 0;
        let mut action_count: u32 = 0;
        let mut runtime_breaches: u32 = 0;
        let mut notes = NoteTracker::rehydrate(&self.run_store.steps(run_id));
        let mut loop_guard = LoopGuard::default();
        self.seed_loop_guard(run_id, &mut loop_guard);
        let agent_tool_policy = self.agent_policy(&run);

        loop {
            if token.is_cancelled() {
                self.run_store.update(run_id, |r| {
                    if !r.status.is_terminal() {
                        r.status = RunStatus::Cancelled;
                    }
                });
                break;
            }

            // Step 1: status re-read — another worker may have moved this
            // run to a terminal/suspended state out from under us (e.g. a
            // request_parent or spawn that raced a wake).
            match self.run_store.get(run_id) {
                Some(r) if r.status == RunStatus::Running => run = r,
                _ => break,
            }

            // Hard ceiling: no `set_run_limits` can extend past this.
            if iteration >= self.config.run_max_iterations_hard_cap {
                self.force_finish(&mut run, "max_iterations").await;
                break;
            }

            // Step 2: runtime ceiling — a single warning on first breach,
            // a forced best-effort finish on the second.
            if started_at.elapsed().as_millis() as u64 >= self.config.run_max_runtime_ms {
                runtime_breaches += 1;
                if runtime_breaches == 1 {
                    self.run_store
                        .append_step(
                            run_id,
                            event_step(run_id, "system_note", serde_json::json!({
                                "content": "Runtime ceiling reached — wrap up with finish now.",
                            })),
                        )
                        .ok();
                } else {
                    self.force_finish(&mut run, "run_max_runtime_ms").await;
                    break;
                }
            }

            // Step 3: budget state for this iteration; gating happens after
            // the command is known.
            let budget_exceeded = budget::budget_exceeded(action_count, iteration, run_iteration_limit);

            iteration += 1;

            // Step 4: assemble the LLM request.
            let role = run.role();
            let active_subagents = self
                .run_store
                .children(run_id)
                .iter()
                .filter(|c| !c.status.is_terminal())
                .count();
            let payload = prompt::build_payload(
                &run,
                role,
                &self.conversation_window(&run, role),
                &self.transcript_tail(run_id),
                &self.subagent_results(run_id),
                active_subagents,
                &self.load_memories(&run.user_id),
                run.input_json.state.last_validation_feedback.as_deref(),
                run.input_json.state.last_block_reason.as_deref(),
            );
            if self.config.run_debug_prompts {
                tracing::debug!(run_id = %run_id, payload = %payload, "planner payload");
            }
            let req = ChatRequest {
                messages: vec![sa_domain::tool::Message::system(prompt::system_prompt(role)), prompt::user_message(&payload)],
                json_mode: true,
                ..Default::default()
            };

            // Step 5/6: call the LLM, retrying on unparsable JSON up to
            // `runMaxJsonRetries` times; exhausting retries fails the run.
            let command = match self.request_command(run_id, req).await {
                Ok(cmd) => cmd,
                Err(reason) => {
                    self.run_store
                        .append_step(run_id, event_step(run_id, "run_failed", serde_json::json!({ "reason": reason })))
                        .ok();
                    crate::wake::fail_run(
                        &self.run_store,
                        &self.queue_store,
                        &run,
                        "parse_error",
                        Some("Sorry — I hit an internal error and could not complete this request."),
                    )
                    .await;
                    break;
                }
            };

            // Step 7a: `set_run_limits` is honoured here — the ceiling is a
            // loop-local variable, never durable state. An extension with no
            // recent progress is refused outright.
            if let RunCommand::SetRunLimits { max_iterations, reason } = &command {
                self.run_store
                    .append_step(
                        run_id,
                        event_step(run_id, "budget_decision", serde_json::json!({
                            "action": "extend",
                            "reason": reason,
                            "maxIterations": max_iterations,
                        })),
                    )
                    .ok();
                if loop_guard.has_shown_no_progress() {
                    self.force_finish(&mut run, "budget_stuck").await;
                    break;
                }
                run_iteration_limit = budget::extend_limit(&self.config, *max_iterations);
                loop_guard.push_iteration(IterationSnapshot {
                    had_tool_call: false,
                    output_snapshot: run.output_text.clone(),
                    command_signature: "set_run_limits".into(),
                });
                continue;
            }

            // Step 7b: past the iteration budget only `set_run_limits` and
            // `finish` are accepted; anything else earns a strike.
            if budget_exceeded && !matches!(command, RunCommand::Finish { .. }) {
                let mut state = run.input_json.state.clone();
                let exhausted = budget::record_strike(&mut state);
                self.run_store.update(run_id, |r| r.input_json.state = state.clone());
                run.input_json.state = state;
                if exhausted {
                    self.run_store
                        .append_step(
                            run_id,
                            event_step(run_id, "budget_decision", serde_json::json!({ "action": "finish", "reason": "max_iterations" })),
                        )
                        .ok();
                    self.force_finish(&mut run, "max_iterations").await;
                    break;
                }
                self.run_store
                    .append_step(
                        run_id,
                        event_step(run_id, "system_note", serde_json::json!({
                            "content": "Iteration budget exhausted — extend with set_run_limits or finish now.",
                        })),
                    )
                    .ok();
                loop_guard.push_iteration(IterationSnapshot {
                    had_tool_call: false,
                    output_snapshot: run.output_text.clone(),
                    command_signature: format!("{command:?}"),
                });
                continue;
            }

            // Step 7c: a run in mandatory-limitation state may only finish.
            // Tool calls stay exempt so the duplicate-call detector keeps
            // authority over a repeated call (it fails the run outright).
            if run.input_json.state.limitation_required
                && !matches!(command, RunCommand::Finish { .. } | RunCommand::ToolCall { .. })
            {
                apply::block(&self.run_store, run_id, "limitation_required", Some("finish with a limitation statement"));
                loop_guard.push_iteration(IterationSnapshot {
                    had_tool_call: false,
                    output_snapshot: run.output_text.clone(),
                    command_signature: format!("{command:?}"),
                });
                continue;
            }

            let had_tool_call = matches!(command, RunCommand::ToolCall { .. });
            let command_signature = format!("{command:?}");
            if command.is_action() {
                action_count += 1;
            }

            // Step 8: apply the command.
            let apply_ctx = ApplyContext {
                run_store: &*self.run_store,
                queue_store: &*self.queue_store,
                cancel_map: &*self.cancel_map,
                trigger_store: &*self.trigger_store,
                tools: &*self.tools,
                config: &self.config,
                approvals: &*self.approvals,
                registry: &*self.registry,
                roles: &self.roles,
                agent_tool_policy: &agent_tool_policy,
            };
            let outcome = apply::apply_command(&apply_ctx, &mut run, &mut notes, &mut loop_guard, &command).await;

            // Step 9: anti-loop detector — tool-call-free, output-identical
            // iterations over a 3-window trip a forced finish.
            loop_guard.push_iteration(IterationSnapshot {
                had_tool_call,
                output_snapshot: run.output_text.clone(),
                command_signature,
            });
            if loop_guard.is_pointless_loop() {
                self.run_store
                    .append_step(
                        run_id,
                        event_step(run_id, "system_note", serde_json::json!({ "content": "No progress across three identical iterations; finishing." })),
                    )
                    .ok();
                self.force_finish(&mut run, "pointless_loop").await;
                break;
            }

            // Step 10: terminal check. Blocked/rewrite iterations still
            // feed the auto-recovery detector — accumulating blocks is
            // exactly the "stuck" signal it watches for.
            match outcome {
                StepOutcome::Stop => break,
                StepOutcome::ContinueUncounted => {
                    // Rewrite requests and blocks don't consume an
                    // iteration toward the terminal guards.
                    iteration = iteration.saturating_sub(1);
                    if apply::maybe_auto_recover(&self.run_store, &self.queue_store, &self.cancel_map, &run).await {
                        break;
                    }
                    continue;
                }
                StepOutcome::Continue => {
                    if apply::maybe_auto_recover(&self.run_store, &self.queue_store, &self.cancel_map, &run).await {
                        break;
                    }
                    continue;
                }
            }
        }

        self.cancel_map.remove(run_id);
    }

    /// Force-finish a run whose budget, runtime, or loop detector tripped
    /// without going through the normal command path.
    async fn force_finish(&self, run: &mut Run, reason: &str) {
        let output = if run.output_text.is_empty() {
            format!("Unable to complete: {reason}.")
        } else {
            run.output_text.clone()
        };
        self.run_store
            .append_step(run.id, RunStep::new(run.id, StepType::Finish, StepStatus::Completed, Uuid::new_v4().to_string()).with_result(serde_json::json!({ "output": output, "forced": true, "reason": reason })))
            .ok();
        self.run_store.update(run.id, |r| {
            r.output_text = output.clone();
            r.status = RunStatus::Completed;
        });
        run.output_text = output;
        run.status = RunStatus::Completed;
        if run.is_coordinator() {
            self.run_store.cascade_cancel(run.id);
            for child_id in self.run_store.children(run.id).into_iter().map(|c| c.id) {
                self.cancel_map.cancel(child_id);
            }
        }
        if let Some(parent_id) = run.parent_run_id {
            crate::wake::wake_parent_run(&self.run_store, &self.queue_store, parent_id).await;
        }
    }

    /// Call the planner role with up to `runMaxJsonRetries + 1` attempts,
    /// re-prompting with the parse error on each failure. Returns the
    /// failure reason once retries are exhausted.
    async fn request_command(&self, run_id: Uuid, mut req: ChatRequest) -> Result<RunCommand, String> {
        let max_attempts = self.config.run_max_json_retries + 1;
        let mut last_error = String::new();
        for attempt in 0..max_attempts {
            let resp = match chat_with_fallback(&self.registry, &self.roles, PLANNER_ROLE, req.clone()).await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            match parse_command(&resp.content) {
                Ok(cmd) => return Ok(cmd),
                Err(e) => {
                    last_error = format!("json_parse_error: {e}");
                    self.run_store
                        .append_step(run_id, event_step(run_id, "json_retry", serde_json::json!({ "attempt": attempt, "error": last_error })))
                        .ok();
                    req.messages.push(sa_domain::tool::Message::assistant(resp.content));
                    req.messages.push(sa_domain::tool::Message::user(format!(
                        "That was not a single valid RunCommand JSON object ({last_error}). Respond with exactly one JSON object."
                    )));
                }
            }
        }
        Err(last_error)
    }
}
