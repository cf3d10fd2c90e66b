//! LLM-based output validator: judges a would-be user-visible output
//! against the run's accumulated requirements/plan notes before it is
//! finalised.

use sa_domain::config::RoleConfig;
use sa_domain::error::{Error, Result};
use sa_domain::tool::Message;
use sa_providers::{chat_with_fallback, ProviderRegistry};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationDecision {
    Send,
    Revise,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationResult {
    pub decision: ValidationDecision,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub retry: bool,
}

const VALIDATOR_ROLE: &str = "validator";

const VALIDATOR_SYSTEM: &str = "You judge a draft output against the task's requirements and plan \
notes. Reply with exactly one JSON object: {\"decision\": \"send\"|\"revise\", \"feedback\": \
\"...\", \"retry\": true|false}.";

/// Runs the validator LLM call. A validator error (malformed JSON,
/// provider failure) is treated as `decision: send` — the run is not
/// blocked by validator flakiness.
pub async fn validate_output(
    registry: &ProviderRegistry,
    roles: &HashMap<String, RoleConfig>,
    requirements: &str,
    plan: &str,
    draft_output: &str,
) -> ValidationResult {
    let payload = serde_json::json!({
        "requirements": requirements,
        "plan": plan,
        "draftOutput": draft_output,
    });
    let req = sa_providers::ChatRequest {
        messages: vec![Message::system(VALIDATOR_SYSTEM), Message::user(payload.to_string())],
        json_mode: true,
        ..Default::default()
    };

    match chat_with_fallback(registry, roles, VALIDATOR_ROLE, req).await {
        Ok(resp) => parse_validation(&resp.content).unwrap_or(ValidationResult {
            decision: ValidationDecision::Send,
            feedback: Some("validator_error: unparsable response".into()),
            retry: false,
        }),
        Err(_) => ValidationResult {
            decision: ValidationDecision::Send,
            feedback: Some("validator_error: provider failure".into()),
            retry: false,
        },
    }
}

fn parse_validation(raw: &str) -> Result<ValidationResult> {
    serde_json::from_str(raw).map_err(|e| Error::Json(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_revise_with_feedback() {
        let raw = r#"{"decision":"revise","feedback":"missing the temperature","retry":true}"#;
        let result = parse_validation(raw).unwrap();
        assert_eq!(result.decision, ValidationDecision::Revise);
        assert!(result.retry);
    }

    #[test]
    fn malformed_json_errors() {
        assert!(parse_validation("not json").is_err());
    }
}
