//! RunStep construction helpers.
//!
//! Most engine-internal events (loop detection, budget decisions, blocked
//! commands, ...) are not one of the handful of first-class `StepType`
//! variants; they are recorded as a `Message` step carrying `{event, ...}`
//! in `result_json`, so consumers filter on the `event` field rather than
//! the step type.

use sa_domain::entities::{RunStep, StepStatus, StepType};
use serde_json::Value;
use uuid::Uuid;

fn fresh_key() -> String {
    Uuid::new_v4().to_string()
}

/// A generic `{event, ...payload}` step, recorded as `StepType::Message`.
pub fn event_step(run_id: Uuid, event: &str, payload: Value) -> RunStep {
    let mut merged = serde_json::json!({ "event": event });
    if let (Some(obj), Value::Object(extra)) = (merged.as_object_mut(), payload) {
        obj.extend(extra);
    }
    RunStep::new(run_id, StepType::Message, StepStatus::Completed, fresh_key()).with_result(merged)
}

pub fn note_step(run_id: Uuid, category: sa_domain::command::NoteCategory, content: &str) -> RunStep {
    RunStep::new(run_id, StepType::Note, StepStatus::Completed, fresh_key())
        .with_result(serde_json::json!({ "category": category, "content": content }))
}

pub fn decision_step(run_id: Uuid, content: &str, importance: Option<&str>) -> RunStep {
    RunStep::new(run_id, StepType::Decision, StepStatus::Completed, fresh_key())
        .with_result(serde_json::json!({ "content": content, "importance": importance }))
}

pub fn tool_call_step(run_id: Uuid, name: &str, args: &Value) -> RunStep {
    RunStep::new(run_id, StepType::ToolCall, StepStatus::Completed, fresh_key())
        .with_tool(name.to_string(), args.clone())
}

pub fn tool_result_step(run_id: Uuid, name: &str, success: bool, result: Value) -> RunStep {
    let status = if success { StepStatus::Completed } else { StepStatus::Failed };
    RunStep::new(run_id, StepType::ToolResult, status, fresh_key())
        .with_tool(name.to_string(), Value::Null)
        .with_result(result)
}

pub fn assistant_message_step(run_id: Uuid, content: &str) -> RunStep {
    RunStep::new(run_id, StepType::AssistantMessage, StepStatus::Completed, fresh_key())
        .with_result(serde_json::json!({ "content": content }))
}

pub fn output_update_step(run_id: Uuid, output: &str, mode: &str) -> RunStep {
    RunStep::new(run_id, StepType::OutputUpdate, StepStatus::Completed, fresh_key())
        .with_result(serde_json::json!({ "output": output, "mode": mode }))
}

pub fn finish_step(run_id: Uuid, output: &str) -> RunStep {
    RunStep::new(run_id, StepType::Finish, StepStatus::Completed, fresh_key())
        .with_result(serde_json::json!({ "output": output }))
}

pub fn validation_missing_step(run_id: Uuid, missing: &str) -> RunStep {
    RunStep::new(run_id, StepType::ValidationMissing, StepStatus::Completed, fresh_key())
        .with_result(serde_json::json!({ "missing": missing }))
}
