use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunState;

/// `kind = coordinator ⇔ parentRunId = ∅`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Coordinator,
    Subagent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Role derived from `(kind, agentLevel)` — controls which RunCommands are
/// legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunRole {
    Coordinator,
    Subagent,
    Subsubagent,
}

impl RunRole {
    pub fn derive(kind: RunKind, agent_level: u8) -> Self {
        match (kind, agent_level) {
            (RunKind::Coordinator, _) => RunRole::Coordinator,
            (RunKind::Subagent, lvl) if lvl >= 2 => RunRole::Subsubagent,
            (RunKind::Subagent, _) => RunRole::Subagent,
        }
    }

    pub fn can_spawn(self) -> bool {
        matches!(self, RunRole::Coordinator | RunRole::Subagent)
    }

    pub fn can_tool_call(self) -> bool {
        matches!(self, RunRole::Subagent | RunRole::Subsubagent)
    }

    pub fn can_send_user_message(self) -> bool {
        matches!(self, RunRole::Coordinator)
    }
}

/// `inputJson` payload carried alongside `inputText`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default)]
    pub state: RunState,
    #[serde(default)]
    pub context: Vec<ContextMessage>,
    pub agent_level: u8,
    #[serde(default)]
    pub allow_subagents: Option<bool>,
    #[serde(default)]
    pub retry_of: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

/// One agent invocation: a row plus an append-only step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub tenant_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub context_id: Option<String>,
    pub parent_run_id: Option<Uuid>,
    pub root_run_id: Uuid,
    pub kind: RunKind,
    pub profile: Option<String>,
    pub input_text: String,
    pub input_json: RunInput,
    /// `None` = unrestricted tool access.
    pub allowed_tools: Option<Vec<String>>,
    pub output_text: String,
    pub status: RunStatus,
    pub wake_at: Option<DateTime<Utc>>,
    pub wake_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Build a fresh coordinator run (no parent).
    pub fn new_coordinator(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        input_text: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            context_id: None,
            parent_run_id: None,
            root_run_id: id,
            kind: RunKind::Coordinator,
            profile: None,
            input_text: input_text.into(),
            input_json: RunInput {
                state: RunState::default(),
                context: Vec::new(),
                agent_level: 0,
                allow_subagents: Some(true),
                retry_of: None,
            },
            allowed_tools: None,
            output_text: String::new(),
            status: RunStatus::Pending,
            wake_at: None,
            wake_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a child run spawned by `parent`.
    pub fn new_child(
        parent: &Run,
        profile: Option<String>,
        task: impl Into<String>,
        allowed_tools: Option<Vec<String>>,
        context: Vec<ContextMessage>,
        agent_level: u8,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            tenant_id: parent.tenant_id.clone(),
            agent_id: parent.agent_id.clone(),
            user_id: parent.user_id.clone(),
            channel_id: parent.channel_id.clone(),
            context_id: parent.context_id.clone(),
            parent_run_id: Some(parent.id),
            root_run_id: parent.root_run_id,
            kind: RunKind::Subagent,
            profile,
            input_text: task.into(),
            input_json: RunInput {
                state: RunState::default(),
                context,
                agent_level,
                allow_subagents: Some(agent_level < 2),
                retry_of: None,
            },
            allowed_tools,
            output_text: String::new(),
            status: RunStatus::Pending,
            wake_at: None,
            wake_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn role(&self) -> RunRole {
        RunRole::derive(self.kind, self.input_json.agent_level)
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self.kind, RunKind::Coordinator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_invariants_hold() {
        let r = Run::new_coordinator("t1", "agent1", "u1", "web", "hello");
        assert_eq!(r.id, r.root_run_id);
        assert!(r.parent_run_id.is_none());
        assert_eq!(r.role(), RunRole::Coordinator);
    }

    #[test]
    fn child_inherits_root_and_tenant() {
        let parent = Run::new_coordinator("t1", "agent1", "u1", "web", "hello");
        let child = Run::new_child(&parent, None, "do thing", None, vec![], 1);
        assert_eq!(child.root_run_id, parent.root_run_id);
        assert_eq!(child.parent_run_id, Some(parent.id));
        assert_eq!(child.tenant_id, parent.tenant_id);
        assert_eq!(child.role(), RunRole::Subagent);
    }

    #[test]
    fn subsubagent_cannot_spawn() {
        let parent = Run::new_coordinator("t1", "agent1", "u1", "web", "hello");
        let child = Run::new_child(&parent, None, "do thing", None, vec![], 2);
        assert_eq!(child.role(), RunRole::Subsubagent);
        assert!(!child.role().can_spawn());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());
    }

    #[test]
    fn role_protocol_matches_table() {
        assert!(RunRole::Coordinator.can_spawn());
        assert!(!RunRole::Coordinator.can_tool_call());
        assert!(RunRole::Coordinator.can_send_user_message());

        assert!(RunRole::Subagent.can_spawn());
        assert!(RunRole::Subagent.can_tool_call());
        assert!(!RunRole::Subagent.can_send_user_message());

        assert!(!RunRole::Subsubagent.can_spawn());
        assert!(RunRole::Subsubagent.can_tool_call());
        assert!(!RunRole::Subsubagent.can_send_user_message());
    }
}
