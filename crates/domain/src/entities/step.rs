use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    ToolCall,
    ToolResult,
    Message,
    AssistantMessage,
    Note,
    Decision,
    OutputUpdate,
    Finish,
    ValidationMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Append-only ordered log entry per run. `seq` strictly increases;
/// `idempotencyKey` is unique across all steps in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: StepType,
    pub tool_name: Option<String>,
    pub args_json: Option<serde_json::Value>,
    pub result_json: Option<serde_json::Value>,
    pub status: StepStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl RunStep {
    /// Builds the step with a generated id/timestamp; `seq` and
    /// `idempotency_key` are assigned by the store on append so retries of
    /// the same logical step reuse the key deterministically.
    pub fn new(
        run_id: Uuid,
        kind: StepType,
        status: StepStatus,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            seq: 0,
            kind,
            tool_name: None,
            args_json: None,
            result_json: None,
            status,
            idempotency_key: idempotency_key.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, args: serde_json::Value) -> Self {
        self.tool_name = Some(name.into());
        self.args_json = Some(args);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result_json = Some(result);
        self
    }
}
