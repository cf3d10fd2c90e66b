//! Memory-writer op parsing: the model returns a JSON array of
//! `add | update | delete | touch` operations, which may arrive as loose
//! JSON (prose wrapped around the array, alternate field names).

use sa_domain::entities::MemoryModule;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Update,
    Delete,
    Touch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOp {
    pub op: OpKind,
    pub module: MemoryModule,
    pub key: String,
    pub value: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OpParseError {
    #[error("no JSON array found in model response")]
    NoArrayFound,
    #[error("op at index {index}: {reason}")]
    InvalidOp { index: usize, reason: String },
}

/// Loosely-typed op as it comes off the wire, before field normalization.
#[derive(Debug, Deserialize)]
struct RawOp {
    #[serde(alias = "action", alias = "type", alias = "intent")]
    op: Option<String>,
    module: Option<String>,
    key: Option<String>,
    #[serde(alias = "new_value", alias = "newValue")]
    value: Option<String>,
    confidence: Option<f64>,
}

/// Parse the model's response into a validated list of ops.
///
/// Tries a strict parse of the whole response as a JSON array first; if
/// that fails, extracts the first bracketed `[...]` substring and retries.
/// Mirrors the run engine's strict-then-loose command parse strategy.
pub fn parse_ops(raw: &str) -> Result<Vec<MemoryOp>, OpParseError> {
    let raw_ops: Vec<RawOp> = serde_json::from_str(raw)
        .or_else(|_| {
            let array_slice = extract_bracketed_array(raw).ok_or(OpParseError::NoArrayFound)?;
            serde_json::from_str(array_slice).map_err(|_| OpParseError::NoArrayFound)
        })?;

    raw_ops
        .into_iter()
        .enumerate()
        .map(|(index, raw)| normalize(index, raw))
        .collect()
}

fn extract_bracketed_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

fn normalize(index: usize, raw: RawOp) -> Result<MemoryOp, OpParseError> {
    let op = match raw.op.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("add") | Some("create") | Some("insert") => OpKind::Add,
        Some("update") | Some("edit") | Some("modify") => OpKind::Update,
        Some("delete") | Some("remove") => OpKind::Delete,
        Some("touch") | Some("refresh") | Some("keep") => OpKind::Touch,
        other => {
            return Err(OpParseError::InvalidOp {
                index,
                reason: format!("unrecognized op '{other:?}'"),
            })
        }
    };

    let module = match raw.module.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("identity") => MemoryModule::Identity,
        Some("preferences") => MemoryModule::Preferences,
        Some("constraints") => MemoryModule::Constraints,
        Some("projects") => MemoryModule::Projects,
        Some("relationships") => MemoryModule::Relationships,
        Some("environment") => MemoryModule::Environment,
        Some("recent_context") | Some("recentcontext") => MemoryModule::RecentContext,
        other => {
            return Err(OpParseError::InvalidOp {
                index,
                reason: format!("unrecognized module '{other:?}'"),
            })
        }
    };

    let key = raw.key.filter(|k| !k.is_empty()).ok_or_else(|| OpParseError::InvalidOp {
        index,
        reason: "missing key".into(),
    })?;

    if matches!(op, OpKind::Add | OpKind::Update) && raw.value.as_deref().unwrap_or("").is_empty() {
        return Err(OpParseError::InvalidOp {
            index,
            reason: "add/update requires a non-empty value".into(),
        });
    }

    Ok(MemoryOp {
        op,
        module,
        key: key.to_ascii_lowercase().replace([' ', '-'], "_"),
        value: raw.value,
        confidence: raw.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
    })
}

/// Pull the first bracketed JSON array out of an arbitrary response, for
/// callers that just want the raw `Value` (tests, debugging).
pub fn extract_json_array(raw: &str) -> Option<Value> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| extract_bracketed_array(raw).and_then(|s| serde_json::from_str(s).ok()))
}
