//! End-to-end scenario tests driving `RunEngine::claim_and_run` against a
//! scripted `LlmProvider` double.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sa_domain::capability::LlmCapabilities;
use sa_domain::config::{RoleConfig, RunConfig};
use sa_domain::entities::{Run, RunStatus, StepType};
use sa_domain::error::{Error, Result};
use sa_engine::RunEngine;
use sa_policy::ApprovalStore;
use sa_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
use sa_queue::{QueueName, QueueStore};
use sa_store::{CancelMap, MemoryStore, MessageStore, RunStore, TriggerStore};
use sa_tools::builtin::weather::WeatherTool;
use sa_tools::builtin::web_search::WebSearchTool;
use sa_tools::ToolRegistry;

/// Replies with one scripted JSON `RunCommand` body per call, in order.
/// Exhausting the script is a test bug, not a production fallback — it
/// errors rather than returning a default command.
struct ScriptedProvider {
    id: String,
    script: Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedProvider {
    fn new(id: &str, script: Vec<&str>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let content = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "scripted response exhausted".into(),
            })?;
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        static CAPS: LlmCapabilities = LlmCapabilities {
            supports_tools: sa_domain::capability::ToolSupport::Basic,
            supports_json_mode: true,
            supports_vision: false,
            context_window_tokens: None,
            max_output_tokens: None,
        };
        &CAPS
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

fn roles_with_planner() -> HashMap<String, RoleConfig> {
    let mut roles = HashMap::new();
    roles.insert(
        "planner".into(),
        RoleConfig {
            model: "test-provider/model".into(),
            temperature: None,
            require_json: true,
            fallbacks: Vec::new(),
        },
    );
    roles
}

fn registry_for(script: Vec<&str>) -> ProviderRegistry {
    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    providers.insert("test-provider".into(), Arc::new(ScriptedProvider::new("test-provider", script)));
    let roles = roles_with_planner()
        .into_iter()
        .map(|(name, cfg)| (name, cfg.model))
        .collect();
    ProviderRegistry::with_providers(providers, roles)
}

fn tool_registry_with_builtins() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(WeatherTool::definition());
    tools.register(WebSearchTool::definition());
    tools
}

fn engine_with(script: Vec<&str>, tools: ToolRegistry, config: RunConfig) -> RunEngine {
    RunEngine {
        run_store: Arc::new(RunStore::new()),
        message_store: Arc::new(MessageStore::new()),
        memory_store: Arc::new(MemoryStore::new()),
        trigger_store: Arc::new(TriggerStore::new()),
        queue_store: Arc::new(QueueStore::new()),
        cancel_map: Arc::new(CancelMap::new()),
        tools: Arc::new(tools),
        config,
        approvals: Arc::new(ApprovalStore::new(chrono::Duration::minutes(10))),
        registry: Arc::new(registry_for(script)),
        roles: roles_with_planner(),
        agent_profiles: HashMap::new(),
    }
}

fn event_count(steps: &[sa_domain::entities::RunStep], event: &str) -> usize {
    steps
        .iter()
        .filter(|s| {
            s.result_json
                .as_ref()
                .and_then(|r| r.get("event"))
                .and_then(|e| e.as_str())
                == Some(event)
        })
        .count()
}

const COORDINATOR_NOTES: [&str; 3] = [
    r#"{"type":"note","category":"requirements","content":"Output must be a short weather summary meeting the success criteria."}"#,
    r#"{"type":"note","category":"plan","content":"1. queue_op push the open questions\n2. spawn_subagent for the forecast lookup with full context\n3. review the result against the success criteria\n4. deliver_subagent_output to the user\n5. confirm the output format matches the request"}"#,
    r#"{"type":"note","category":"artifact","content":"Next I will invoke the weather tool for Bremen."}"#,
];

/// Scenario 1: a coordinator that tries to call a tool directly is diverted
/// into an auto-spawned `auto_tool` subagent rather than being rejected.
#[tokio::test]
async fn coordinator_tool_call_auto_spawns_subagent() {
    let script = vec![
        COORDINATOR_NOTES[0],
        COORDINATOR_NOTES[1],
        COORDINATOR_NOTES[2],
        r#"{"type":"tool_call","name":"weather.get","args":{"city":"Bremen"}}"#,
    ];
    let engine = engine_with(script, tool_registry_with_builtins(), RunConfig::default());

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "what's the weather in Bremen tomorrow?");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let coordinator = engine.run_store.get(run_id).unwrap();
    assert_eq!(coordinator.status, RunStatus::Waiting);

    let steps = engine.run_store.steps(run_id);
    assert!(steps.iter().all(|s| s.kind != StepType::ToolCall));
    assert_eq!(event_count(&steps, "auto_spawn_from_tool_call"), 1);

    let children = engine.run_store.children(run_id);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].allowed_tools.as_deref(), Some(&["weather.get".to_string()][..]));
    assert_eq!(children[0].profile.as_deref(), Some("auto_tool"));
    assert_eq!(engine.queue_store.depth(QueueName::Runs), 1);
}

/// A coordinator tool call without the requirements/plan/artifact prelude
/// is blocked instead of auto-spawning.
#[tokio::test]
async fn coordinator_tool_call_without_notes_is_blocked() {
    let script = vec![
        r#"{"type":"tool_call","name":"weather.get","args":{"city":"Bremen"}}"#,
        COORDINATOR_NOTES[0],
        COORDINATOR_NOTES[1],
        COORDINATOR_NOTES[2],
        r#"{"type":"tool_call","name":"weather.get","args":{"city":"Bremen"}}"#,
    ];
    let engine = engine_with(script, tool_registry_with_builtins(), RunConfig::default());

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "what's the weather in Bremen tomorrow?");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let steps = engine.run_store.steps(run_id);
    assert_eq!(event_count(&steps, "action_blocked"), 1);
    assert_eq!(event_count(&steps, "auto_spawn_from_tool_call"), 1);
    assert!(steps.iter().all(|s| s.kind != StepType::ToolCall));
}

/// Scenario 2: past the iteration budget, a `set_run_limits` extension from
/// a run that has shown no progress is refused and the run is force-finished
/// with `budget_stuck`.
#[tokio::test]
async fn budget_extension_without_progress_is_refused() {
    // Distinct commands keep the 3-window repetition guard quiet; what
    // matters for the refusal is tool-free iterations with an unchanged
    // output.
    let script = vec![
        r#"{"type":"set_output","output":"same","mode":"replace"}"#,
        r#"{"type":"decision","content":"still weighing option a"}"#,
        r#"{"type":"decision","content":"still weighing option b"}"#,
        r#"{"type":"decision","content":"still weighing option c"}"#,
        r#"{"type":"set_run_limits","max_iterations":8,"reason":"need more room"}"#,
    ];
    let mut config = RunConfig::default();
    config.run_max_iterations = 4;
    config.run_min_iterations = 1;
    let engine = engine_with(script, ToolRegistry::new(), config);

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "keep working");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let run = engine.run_store.get(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output_text, "same");

    let steps = engine.run_store.steps(run_id);
    assert_eq!(event_count(&steps, "budget_decision"), 1);
    let finish = steps.iter().rev().find(|s| s.kind == StepType::Finish).unwrap();
    assert_eq!(
        finish.result_json.as_ref().and_then(|r| r.get("reason")).and_then(|r| r.as_str()),
        Some("budget_stuck")
    );
}

/// Past the budget, non-finish commands earn strikes until the fourth
/// forces a `max_iterations` finish.
#[tokio::test]
async fn budget_strikes_force_finish_after_four() {
    let script = vec![
        r#"{"type":"set_output","output":"o1","mode":"replace"}"#,
        r#"{"type":"set_output","output":"o2","mode":"replace"}"#,
        r#"{"type":"queue_op","action":"push","items":["a"]}"#,
        r#"{"type":"queue_op","action":"push","items":["b"]}"#,
        r#"{"type":"queue_op","action":"push","items":["c"]}"#,
        r#"{"type":"queue_op","action":"push","items":["d"]}"#,
    ];
    let mut config = RunConfig::default();
    config.run_max_iterations = 2;
    config.run_min_iterations = 1;
    let engine = engine_with(script, ToolRegistry::new(), config);

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "keep working");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let run = engine.run_store.get(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let steps = engine.run_store.steps(run_id);
    let finish = steps.iter().rev().find(|s| s.kind == StepType::Finish).unwrap();
    assert_eq!(
        finish.result_json.as_ref().and_then(|r| r.get("reason")).and_then(|r| r.as_str()),
        Some("max_iterations")
    );
    assert!(event_count(&steps, "system_note") >= 3);
}

/// Scenario 3: a subagent that repeats the same tool call a third time is
/// failed outright; the parent records `subagent_failed` and is woken.
#[tokio::test]
async fn duplicate_tool_call_trips_loop_detection() {
    let script = vec![
        r#"{"type":"tool_call","name":"weather.get","args":{"city":"Bremen"}}"#,
        r#"{"type":"tool_call","name":"weather.get","args":{"city":"Bremen"}}"#,
        r#"{"type":"tool_call","name":"weather.get","args":{"city":"Bremen"}}"#,
    ];
    let engine = engine_with(script, tool_registry_with_builtins(), RunConfig::default());

    let parent = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "loop task");
    let parent_id = parent.id;
    engine.run_store.insert(parent.clone());
    engine.run_store.update(parent_id, |r| r.status = RunStatus::Waiting);

    let child = Run::new_child(&parent, Some("auto_tool".into()), "call weather repeatedly", Some(vec!["weather.get".into()]), vec![], 1);
    let child_id = child.id;
    engine.run_store.insert(child);

    engine.claim_and_run(child_id).await;

    let child = engine.run_store.get(child_id).unwrap();
    assert_eq!(child.status, RunStatus::Failed);

    let steps = engine.run_store.steps(child_id);
    assert_eq!(event_count(&steps, "loop_detected"), 1);
    assert!(!steps.iter().any(|s| s.kind == StepType::Finish));

    let parent = engine.run_store.get(parent_id).unwrap();
    assert_eq!(parent.status, RunStatus::Pending);
    assert_eq!(event_count(&engine.run_store.steps(parent_id), "subagent_failed"), 1);
    assert_eq!(engine.queue_store.depth(QueueName::Runs), 1);
}

/// Scenario 4: a subagent requesting clarification wakes its parent and
/// suspends; the parent's reply clears the wait and re-enqueues the child.
#[tokio::test]
async fn request_parent_and_reply_wake_cycle() {
    let script = vec![r#"{"type":"request_parent","message":"which tool should I use?"}"#];
    let engine = engine_with(script, ToolRegistry::new(), RunConfig::default());

    let parent = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "delegate this");
    let parent_id = parent.id;
    engine.run_store.insert(parent.clone());
    engine.run_store.update(parent_id, |r| r.status = RunStatus::Waiting);

    let child = Run::new_child(&parent, None, "ambiguous task", None, vec![], 1);
    let child_id = child.id;
    engine.run_store.insert(child);

    engine.claim_and_run(child_id).await;

    let child_after = engine.run_store.get(child_id).unwrap();
    assert_eq!(child_after.status, RunStatus::Waiting);
    assert_eq!(child_after.wake_reason.as_deref(), Some("waiting_for_parent"));
    assert!(child_after.input_json.state.waiting_for_parent);

    let parent_after = engine.run_store.get(parent_id).unwrap();
    assert_eq!(parent_after.status, RunStatus::Pending);
    assert_eq!(parent_after.input_json.state.inbox.len(), 1);
    assert_eq!(parent_after.input_json.state.inbox[0].message, "which tool should I use?");

    sa_engine::wake::reply_subagent(&engine.run_store, &engine.queue_store, parent_id, child_id, "use weather.get").await;

    let child_final = engine.run_store.get(child_id).unwrap();
    assert_eq!(child_final.status, RunStatus::Pending);
    assert!(!child_final.input_json.state.waiting_for_parent);
    assert_eq!(child_final.input_json.state.inbox.len(), 1);
    assert_eq!(child_final.input_json.state.inbox[0].message, "use weather.get");
}

/// Repeated tool failures past `runMaxToolRetries` put the run into
/// mandatory limitation: everything but `finish` is blocked.
#[tokio::test]
async fn tool_failures_force_a_limitation_finish() {
    let script = vec![
        r#"{"type":"note","category":"requirements","content":"Output must be a short list of findings meeting the success criteria."}"#,
        r#"{"type":"note","category":"plan","content":"1. call web.search with the query\n2. summarise the findings"}"#,
        r#"{"type":"tool_call","name":"web.search","args":{"query":"rust async runtimes"}}"#,
        r#"{"type":"tool_call","name":"web.search","args":{"query":"rust async executors"}}"#,
        r#"{"type":"tool_call","name":"web.search","args":{"query":"tokio alternatives"}}"#,
        r#"{"type":"tool_call","name":"web.search","args":{"query":"async rust comparison"}}"#,
        r#"{"type":"set_output","output":"partial findings","mode":"replace"}"#,
        r#"{"type":"finish","output":"I could not complete the search; web.search is unavailable in this deployment. Best effort: none."}"#,
    ];
    let engine = engine_with(script, tool_registry_with_builtins(), RunConfig::default());

    let parent = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "research task");
    let parent_id = parent.id;
    engine.run_store.insert(parent.clone());
    engine.run_store.update(parent_id, |r| r.status = RunStatus::Waiting);

    let child = Run::new_child(&parent, None, "search the web for rust news", None, vec![], 1);
    let child_id = child.id;
    engine.run_store.insert(child);

    engine.claim_and_run(child_id).await;

    let child = engine.run_store.get(child_id).unwrap();
    assert_eq!(child.status, RunStatus::Completed);
    assert!(child.input_json.state.limitation_required);

    let steps = engine.run_store.steps(child_id);
    let blocked = steps.iter().any(|s| {
        s.result_json
            .as_ref()
            .and_then(|r| r.get("reason"))
            .and_then(|r| r.as_str())
            == Some("limitation_required")
    });
    assert!(blocked, "set_output should have been blocked by the limitation gate");
    assert!(child.output_text.contains("could not complete"));
}

/// First runtime-ceiling breach warns; the second force-finishes.
#[tokio::test]
async fn runtime_ceiling_warns_then_force_finishes() {
    let script = vec![
        r#"{"type":"note","category":"requirements","content":"Output must be a concise answer meeting the success criteria."}"#,
    ];
    let mut config = RunConfig::default();
    config.run_max_runtime_ms = 0;
    let engine = engine_with(script, ToolRegistry::new(), config);

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "slow task");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let run = engine.run_store.get(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let steps = engine.run_store.steps(run_id);
    assert_eq!(event_count(&steps, "system_note"), 1);
    let finish = steps.iter().rev().find(|s| s.kind == StepType::Finish).unwrap();
    assert_eq!(
        finish.result_json.as_ref().and_then(|r| r.get("reason")).and_then(|r| r.as_str()),
        Some("run_max_runtime_ms")
    );
}

/// The hard iteration cap holds even when no action was ever taken, so
/// `budgetExceeded` (which requires one action) never fires.
#[tokio::test]
async fn hard_cap_bounds_action_free_runs() {
    let script = vec![
        r#"{"type":"note","category":"requirements","content":"Output must be a concise answer meeting the success criteria."}"#,
        r#"{"type":"note","category":"validation","content":"checked against the criteria"}"#,
    ];
    let mut config = RunConfig::default();
    config.run_max_iterations = 2;
    config.run_min_iterations = 1;
    config.run_max_iterations_hard_cap = 2;
    let engine = engine_with(script, ToolRegistry::new(), config);

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "ponder");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let run = engine.run_store.get(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let steps = engine.run_store.steps(run_id);
    let finish = steps.iter().rev().find(|s| s.kind == StepType::Finish).unwrap();
    assert_eq!(
        finish.result_json.as_ref().and_then(|r| r.get("reason")).and_then(|r| r.as_str()),
        Some("max_iterations")
    );
}

/// `queue_op push [X,Y] → shift → shift` leaves the coordinator task queue
/// empty; a second blocked finish fabricates fallback notes so the run can
/// still end.
#[tokio::test]
async fn queue_op_round_trip_drains_the_task_queue() {
    let script = vec![
        r#"{"type":"queue_op","action":"push","items":["X","Y"]}"#,
        r#"{"type":"queue_op","action":"shift"}"#,
        r#"{"type":"queue_op","action":"shift"}"#,
        r#"{"type":"finish","output":"done"}"#,
        r#"{"type":"finish","output":"done"}"#,
    ];
    let engine = engine_with(script, ToolRegistry::new(), RunConfig::default());

    let run = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "track tasks");
    let run_id = run.id;
    engine.run_store.insert(run);

    engine.claim_and_run(run_id).await;

    let run = engine.run_store.get(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.input_json.state.queue.is_empty());

    let steps = engine.run_store.steps(run_id);
    assert_eq!(event_count(&steps, "finish_blocked"), 2);
}

/// `queue_op` is a coordinator-only command; a subagent attempting it is
/// blocked with a role violation.
#[tokio::test]
async fn queue_op_from_subagent_is_a_role_violation() {
    let script = vec![r#"{"type":"queue_op","action":"push","items":["task"]}"#];
    let engine = engine_with(script, ToolRegistry::new(), RunConfig::default());

    let parent = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "delegate");
    engine.run_store.insert(parent.clone());
    let child = Run::new_child(&parent, None, "sub task", None, vec![], 1);
    let child_id = child.id;
    engine.run_store.insert(child);

    engine.claim_and_run(child_id).await;

    let steps = engine.run_store.steps(child_id);
    let blocked = steps.iter().any(|s| {
        s.result_json
            .as_ref()
            .and_then(|r| r.get("reason"))
            .and_then(|r| r.as_str())
            == Some("role_violation")
    });
    assert!(blocked);
    assert!(engine.run_store.get(child_id).unwrap().input_json.state.queue.is_empty());
}

/// Scenario 6: cancelling a coordinator with active children cascades the
/// cancellation to every non-terminal descendant in one commit.
#[tokio::test]
async fn cancellation_cascades_to_active_children() {
    let engine = engine_with(vec![], ToolRegistry::new(), RunConfig::default());

    let coordinator = Run::new_coordinator("tenant-1", "agent-1", "user-1", "web", "fan out work");
    let coordinator_id = coordinator.id;
    engine.run_store.insert(coordinator.clone());

    let child_a = Run::new_child(&coordinator, None, "task a", None, vec![], 1);
    let child_a_id = child_a.id;
    engine.run_store.insert(child_a);
    let child_b = Run::new_child(&coordinator, None, "task b", None, vec![], 1);
    let child_b_id = child_b.id;
    engine.run_store.insert(child_b);

    let cancelled = engine.run_store.cascade_cancel(coordinator_id);
    assert!(cancelled.contains(&child_a_id));
    assert!(cancelled.contains(&child_b_id));

    assert_eq!(engine.run_store.get(child_a_id).unwrap().status, RunStatus::Cancelled);
    assert_eq!(engine.run_store.get(child_b_id).unwrap().status, RunStatus::Cancelled);

    let steps_a = engine.run_store.steps(child_a_id);
    let steps_b = engine.run_store.steps(child_b_id);
    assert!(steps_a.is_empty());
    assert!(steps_b.is_empty());
}
