//! Execution context passed to a tool handler.

use serde_json::Value;
use uuid::Uuid;

/// Everything a tool handler needs about the run invoking it.
///
/// Deliberately data-only — handlers reach the store/queue through whatever
/// the caller wires in via [`crate::registry::ToolRegistry::dispatch`], not
/// through this struct, so `sa-tools` never depends on `sa-store`.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: String,
    pub agent_id: String,
    pub run_id: Uuid,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    /// The tool's `config.schema`-validated user settings, if any were configured.
    pub tool_config: Option<Value>,
}

impl ToolContext {
    pub fn new(tenant_id: impl Into<String>, agent_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            run_id,
            user_id: None,
            channel_id: None,
            tool_config: None,
        }
    }
}
