//! Tool registry — resolves `tool.command` strings, validates arguments
//! against the command's schema, and dispatches to the registered handler.

use std::collections::HashMap;
use std::sync::Arc;

use sa_domain::config::{PolicyDecision, ToolPolicy};
use sa_domain::error::{Error, Result};
use sa_domain::tool::ToolDefinition;
use serde_json::Value;

use crate::context::ToolContext;
use crate::handler::{ToolHandler, ToolOutcome};

/// One invocable command a tool exposes (`tool.command`).
#[derive(Clone)]
pub struct ToolCommand {
    pub name: String,
    pub description: String,
    /// JSON Schema for this command's arguments.
    pub args_schema: Value,
}

/// A registered tool: identity, commands, and the handler that executes them.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub short_description: String,
    pub long_description: String,
    pub commands: Vec<ToolCommand>,
    /// JSON Schema for this tool's user-configurable settings, if any.
    pub config_schema: Option<Value>,
    /// Pinned tools are never evicted from a transcript summary.
    pub pinned: bool,
    /// Important tools are always included in the LLM's tool list even under
    /// a restrictive default-deny policy profile.
    pub important: bool,
    /// The tool's own declared allow/deny/approve rules, combined with the
    /// caller's agent-level policy profile by the policy engine.
    pub policy: ToolPolicy,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

impl ToolDef {
    pub fn command(&self, name: &str) -> Option<&ToolCommand> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// Split a `tool.command` identifier into its two parts.
///
/// Tool names never contain `.`; the first segment is the tool, the
/// remainder (rejoined) is the command name, so commands themselves may use
/// dots (e.g. `memory.search.v2` would split to tool `memory`, command
/// `search.v2`).
fn split_tool_command(full_name: &str) -> Option<(&str, &str)> {
    full_name.split_once('.')
}

/// Check an args object against the required-field list of a JSON Schema.
///
/// This is intentionally not a full JSON Schema validator — it enforces the
/// one property every command schema in this registry actually relies on:
/// required keys must be present. Type-level validation is left to the
/// handler, which already has to branch on argument shape regardless.
fn validate_required(tool: &str, command: &str, schema: &Value, args: &Value) -> Result<()> {
    let required = match schema.get("required").and_then(|v| v.as_array()) {
        Some(r) => r,
        None => return Ok(()),
    };
    for key in required {
        let key = key.as_str().unwrap_or_default();
        if args.get(key).is_none() {
            return Err(Error::ToolFailed {
                tool: format!("{tool}.{command}"),
                message: format!("missing required argument '{key}'"),
            });
        }
    }
    Ok(())
}

/// Holds all registered tools and dispatches calls to them.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ToolDef) {
        self.tools.insert(def.name.clone(), def);
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolDef> {
        self.tools.get(tool_name)
    }

    /// Resolve a `tool.command` identifier to its definitions, if registered.
    pub fn resolve(&self, full_name: &str) -> Option<(&ToolDef, &ToolCommand)> {
        let (tool_name, command_name) = split_tool_command(full_name)?;
        let tool = self.tools.get(tool_name)?;
        let command = tool.command(command_name)?;
        Some((tool, command))
    }

    /// Build the flattened `ToolDefinition` list exposed to the LLM, one
    /// entry per `tool.command`, filtered through `policy` (entries the
    /// policy denies outright are omitted; `approve`-gated entries stay
    /// visible since they are still callable, just suspended on use).
    pub fn definitions(&self, policy: Option<&ToolPolicy>) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for tool in self.tools.values() {
            for command in &tool.commands {
                let full_name = format!("{}.{}", tool.name, command.name);
                if !tool.important && tool.policy.decide(&full_name) == PolicyDecision::Deny {
                    continue;
                }
                if let Some(policy) = policy {
                    if !tool.important && policy.decide(&full_name) == PolicyDecision::Deny {
                        continue;
                    }
                }
                defs.push(ToolDefinition {
                    name: full_name,
                    description: format!("{} {}", tool.short_description, command.description)
                        .trim()
                        .to_string(),
                    parameters: command.args_schema.clone(),
                });
            }
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Resolve, validate, and dispatch a `tool.command` call.
    ///
    /// Returns `Err` for resolution/validation failures (unknown tool,
    /// unknown command, missing required argument) and `Ok(ToolOutcome)` for
    /// everything the handler itself decides, success or failure.
    pub async fn dispatch(
        &self,
        ctx: &ToolContext,
        full_name: &str,
        args: Value,
    ) -> Result<ToolOutcome> {
        let (tool, command) = self.resolve(full_name).ok_or_else(|| Error::ToolFailed {
            tool: full_name.to_string(),
            message: "unknown tool or command".into(),
        })?;

        validate_required(&tool.name, &command.name, &command.args_schema, &args)?;

        tracing::debug!(tool = %full_name, run_id = %ctx.run_id, "dispatching tool call");
        tool.handler.handle(ctx, &command.name, args).await
    }
}
