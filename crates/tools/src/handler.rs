//! Tool handler trait and outcome type.

use sa_domain::error::Result;
use serde_json::Value;

use crate::context::ToolContext;

/// Result of a single tool command invocation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self { success: true, result: Some(result), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, result: None, error: Some(error.into()) }
    }
}

/// A tool's command handler.
///
/// Argument schema validation happens in [`crate::registry::ToolRegistry::dispatch`]
/// before the handler runs — handlers receive already-validated arguments and
/// return `Err` only for handler-internal failures (a transport error, not a
/// malformed call).
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, ctx: &ToolContext, command: &str, args: Value) -> Result<ToolOutcome>;
}
