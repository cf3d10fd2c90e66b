//! System prompt and request-payload assembly for one planner iteration.

use sa_domain::entities::{Run, RunRole};
use sa_domain::tool::Message;
use serde_json::{json, Value};

const COORDINATOR_SYSTEM: &str = "You are the coordinator for this run. You can delegate work to \
subagents and speak to the end user, but you cannot call tools directly and you cannot finish \
without first recording a requirements note, a plan note, and an artifact note. Respond with \
exactly one JSON RunCommand object per turn.";

const SUBAGENT_SYSTEM: &str = "You are a subagent executing a delegated task. You can call tools \
and spawn further subsubagents, but you cannot message the end user directly; your output is \
delivered to your parent via `finish`. Respond with exactly one JSON RunCommand object per turn.";

const SUBSUBAGENT_SYSTEM: &str = "You are a leaf subagent executing a narrowly scoped delegated \
task. You can call tools but cannot spawn further children. Respond with exactly one JSON \
RunCommand object per turn.";

pub fn system_prompt(role: RunRole) -> &'static str {
    match role {
        RunRole::Coordinator => COORDINATOR_SYSTEM,
        RunRole::Subagent => SUBAGENT_SYSTEM,
        RunRole::Subsubagent => SUBSUBAGENT_SYSTEM,
    }
}

/// Assembles the per-iteration JSON user payload: task, output,
/// conversation window, trimmed transcript, subagent results, run
/// metadata, memories, state, and any pending feedback.
#[allow(clippy::too_many_arguments)]
pub fn build_payload(
    run: &Run,
    role: RunRole,
    conversation: &[Value],
    transcript_tail: &[Value],
    subagent_results: &[Value],
    active_subagent_count: usize,
    memories: &[Value],
    validation_feedback: Option<&str>,
    last_block: Option<&str>,
) -> Value {
    json!({
        "task": run.input_text,
        "outputText": run.output_text,
        "conversation": conversation,
        "transcript": transcript_tail,
        "subagentResults": subagent_results,
        "runKind": run.kind,
        "profile": run.profile,
        "input": run.input_json,
        "memories": memories,
        "agentLevel": run.input_json.agent_level,
        "state": run.input_json.state,
        "activeSubagentCount": active_subagent_count,
        "validationFeedback": validation_feedback,
        "lastBlock": last_block,
        "role": role,
    })
}

pub fn user_message(payload: &Value) -> Message {
    Message::user(payload.to_string())
}
