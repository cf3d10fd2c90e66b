//! Stub `web.search` tool — always returns an "unavailable" outcome.
//!
//! Demonstrates how a tool plugin that isn't wired to a real backend should
//! behave: it still resolves and validates like any other tool, it just
//! reports failure with a suggested alternative instead of crashing the run.

use std::sync::Arc;

use async_trait::async_trait;
use sa_domain::error::Result;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::handler::{ToolHandler, ToolOutcome};
use crate::registry::{ToolCommand, ToolDef};

pub struct WebSearchTool;

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn handle(&self, _ctx: &ToolContext, command: &str, _args: Value) -> Result<ToolOutcome> {
        match command {
            "search" => Ok(ToolOutcome::failed(
                "web.search is not configured in this deployment",
            )),
            other => Ok(ToolOutcome::failed(format!("unknown command '{other}'"))),
        }
    }
}

impl WebSearchTool {
    pub fn definition() -> ToolDef {
        ToolDef {
            name: "web".into(),
            short_description: "Search the web.".into(),
            long_description: "Currently unavailable in this deployment; always fails with a suggested alternative.".into(),
            commands: vec![ToolCommand {
                name: "search".into(),
                description: "Search the web for a query.".into(),
                args_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search query" }
                    },
                    "required": ["query"]
                }),
            }],
            config_schema: None,
            pinned: false,
            important: false,
            policy: Default::default(),
            handler: Arc::new(WebSearchTool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn search_always_reports_unavailable() {
        let tool = WebSearchTool;
        let ctx = ToolContext::new("tenant-1", "agent-1", Uuid::new_v4());
        let outcome = tool
            .handle(&ctx, "search", json!({"query": "rust async"}))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not configured"));
    }
}
