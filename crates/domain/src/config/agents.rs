use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for a sub-agent a coordinator may spawn into.
///
/// Each agent carries its own tool policy, model overrides, and fan-out
/// limits, used by the run engine's `spawn_subagent` to configure a child
/// agent's delegation scope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Tool allow/deny/approve policy.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    /// Agent-specific role->model mapping, overriding `llm.roles`.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Fan-out / recursion limits.
    #[serde(default)]
    pub limits: AgentLimits,
}

/// Hard ceilings on multi-agent fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum `agentLevel` a spawned child may carry. Fixed at 2
    /// (subsubagent) by default; kept configurable downward for stricter
    /// profiles.
    #[serde(default = "d_max_agent_level")]
    pub max_agent_level: u8,
    /// Maximum number of children a single spawn_subagents call may create.
    #[serde(default = "d_5")]
    pub max_children_per_spawn: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_agent_level: d_max_agent_level(),
            max_children_per_spawn: d_5(),
        }
    }
}

/// Decision returned by the Policy Engine for a `(tenant, agent, tool,
/// command, args)` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    Approve,
}

/// Tool allow/deny/approve policy — prefix-based matching.
///
/// Extends a binary allow/deny into a three-way decision: `deny` still
/// wins outright, but entries may additionally land in `approve` to
/// suspend the call pending an external decision rather than reject it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this agent may use outright. `["*"]` or empty =
    /// unrestricted (subject to `deny`/`approve`).
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes denied outright. Evaluated before `approve`.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Tool name prefixes that require approval before executing.
    #[serde(default)]
    pub approve: Vec<String>,
}

impl ToolPolicy {
    fn matches(prefixes: &[String], name: &str) -> bool {
        prefixes.iter().any(|p| {
            let p = p.to_ascii_lowercase();
            p == "*" || name == p || name.starts_with(&format!("{p}."))
        })
    }

    /// Decide allow/deny/approve for a tool name. Case-insensitive,
    /// deny-first, then approve, then allow (empty/`["*"]` allow list is
    /// unrestricted).
    pub fn decide(&self, tool_name: &str) -> PolicyDecision {
        let name = tool_name.to_ascii_lowercase();

        if Self::matches(&self.deny, &name) {
            return PolicyDecision::Deny;
        }
        if Self::matches(&self.approve, &name) {
            return PolicyDecision::Approve;
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return PolicyDecision::Allow;
        }
        if Self::matches(&self.allow, &name) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny
        }
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        self.decide(tool_name) == PolicyDecision::Allow
    }
}

fn d_max_agent_level() -> u8 {
    2
}
fn d_5() -> u32 {
    5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
