//! Policy decision for a single tool call.
//!
//! Combines the tool's own declared policy with the calling agent's policy
//! profile (`AgentConfig.tool_policy`), reusing `ToolPolicy::decide` for
//! the matching rules rather than reimplementing them.

use sa_domain::config::{PolicyDecision, ToolPolicy};

/// The full input the engine needs to decide a call:
/// `(tenantId, agentId, toolName, commandName, args, policyProfile)` plus
/// the resolved tool's own policy. `args` itself isn't inspected by this
/// engine — decisions here are name-based, not content-based.
#[derive(Debug, Clone)]
pub struct PolicyRequest<'a> {
    pub tenant_id: &'a str,
    pub agent_id: &'a str,
    pub tool_name: &'a str,
    pub command_name: &'a str,
}

impl<'a> PolicyRequest<'a> {
    fn full_name(&self) -> String {
        format!("{}.{}", self.tool_name, self.command_name)
    }
}

/// Decide allow/deny/approve for a call.
///
/// `deny` wins if either the tool's own policy or the agent's profile
/// denies it. Otherwise, `approve` wins if either requires it. Only when
/// neither policy restricts the call does it resolve to `allow`.
pub fn decide(
    request: &PolicyRequest<'_>,
    tool_policy: &ToolPolicy,
    profile: &ToolPolicy,
) -> PolicyDecision {
    let name = request.full_name();
    let tool_decision = tool_policy.decide(&name);
    let profile_decision = profile.decide(&name);

    if tool_decision == PolicyDecision::Deny || profile_decision == PolicyDecision::Deny {
        return PolicyDecision::Deny;
    }
    if tool_decision == PolicyDecision::Approve || profile_decision == PolicyDecision::Approve {
        return PolicyDecision::Approve;
    }
    PolicyDecision::Allow
}
