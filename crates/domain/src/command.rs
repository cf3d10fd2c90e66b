//! `RunCommand` — the 15 JSON shapes the LLM may emit each turn.
//!
//! Parsing is two-layered: a
//! strict `serde` tagged enum first, falling back to [`normalize_loose`]
//! which rewrites common alternate shapes (wrong casing, synonym field
//! names) before a second strict parse attempt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    Push,
    Shift,
    Clear,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteCategory {
    Requirements,
    Plan,
    Artifact,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentSpec {
    #[serde(default)]
    pub profile: Option<String>,
    pub task: String,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<Vec<crate::entities::ContextMessage>>,
    #[serde(default)]
    pub agent_level: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunCommand {
    ToolCall {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    SendMessage {
        message: String,
    },
    DeliverSubagentOutput {
        run_id: Uuid,
    },
    RequestParent {
        message: String,
    },
    ReplySubagent {
        run_id: Uuid,
        message: String,
    },
    RetrySubagent {
        run_id: Uuid,
        feedback: String,
    },
    QueueOp {
        action: QueueAction,
        #[serde(default)]
        items: Vec<String>,
    },
    SetOutput {
        output: String,
        #[serde(default = "default_mode")]
        mode: OutputMode,
    },
    Finish {
        #[serde(default)]
        output: Option<String>,
        #[serde(default = "default_mode")]
        mode: OutputMode,
    },
    Decision {
        content: String,
        #[serde(default)]
        importance: Option<Importance>,
    },
    Note {
        category: NoteCategory,
        content: String,
    },
    SetRunLimits {
        max_iterations: u32,
        #[serde(default)]
        reason: Option<String>,
    },
    SpawnSubagent {
        subagent: SubagentSpec,
    },
    SpawnSubagents {
        subagents: Vec<SubagentSpec>,
    },
    Sleep {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        wake_at: Option<chrono::DateTime<chrono::Utc>>,
        #[serde(default)]
        delay_seconds: Option<u64>,
        #[serde(default)]
        cron: Option<String>,
    },
}

fn default_mode() -> OutputMode {
    OutputMode::Replace
}

impl RunCommand {
    /// Whether this command is an *action* in the note/rationale/action
    /// protocol sense — anything other than a `note` or `decision`.
    pub fn is_action(&self) -> bool {
        !matches!(self, RunCommand::Note { .. } | RunCommand::Decision { .. })
    }

    /// Whether this command ends the current iteration loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunCommand::Finish { .. }
                | RunCommand::Sleep { .. }
                | RunCommand::SpawnSubagent { .. }
                | RunCommand::SpawnSubagents { .. }
                | RunCommand::RequestParent { .. }
        )
    }

    /// A stable `(name, args)` signature for duplicate-tool-call detection.
    /// Returns `None` for non-tool-call commands.
    pub fn tool_signature(&self) -> Option<String> {
        match self {
            RunCommand::ToolCall { name, args } => {
                Some(format!("{name}:{}", canonical_json(args)))
            }
            _ => None,
        }
    }
}

/// Deterministic JSON rendering (sorted object keys) used for signature
/// comparisons so key order never causes a false loop-detector miss.
fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), sort(v));
                }
                serde_json::Value::Object(out)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Parse a RunCommand, applying the loose normalisation pass on first
/// failure. Returns the normalised JSON text alongside the
/// parsed command only when the loose path was needed, for logging.
pub fn parse_command(raw: &str) -> Result<RunCommand, serde_json::Error> {
    match serde_json::from_str::<RunCommand>(raw) {
        Ok(cmd) => Ok(cmd),
        Err(strict_err) => {
            let value: serde_json::Value = serde_json::from_str(raw)?;
            let normalized = normalize_loose(value);
            serde_json::from_value(normalized).map_err(|_| strict_err)
        }
    }
}

/// Rewrites common alternate shapes before strict parsing: lowercases the
/// `type` discriminator and maps a handful of synonym field names seen in
/// the wild (`cmd`/`action` for `type`, `msg` for `message`).
fn normalize_loose(mut value: serde_json::Value) -> serde_json::Value {
    let Some(obj) = value.as_object_mut() else {
        return value;
    };

    if !obj.contains_key("type") {
        for alt in ["cmd", "command"] {
            if let Some(v) = obj.remove(alt) {
                obj.insert("type".into(), v);
                break;
            }
        }
    }

    if let Some(serde_json::Value::String(t)) = obj.get("type") {
        obj.insert("type".into(), serde_json::Value::String(t.to_lowercase()));
    }

    if !obj.contains_key("message") {
        if let Some(v) = obj.remove("msg") {
            obj.insert("message".into(), v);
        }
    }

    value
}
