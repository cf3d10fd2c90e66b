use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM Client configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_2")]
    pub max_retries: u32,
    pub base_url: Option<String>,
    /// Model roles (`planner`, `executor`, `validator`, `memory_writer`, ...)
    /// each with a primary model and an ordered fallback chain.
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_timeout_ms(),
            max_retries: d_2(),
            base_url: None,
            roles: HashMap::new(),
            providers: Vec::new(),
        }
    }
}

/// Primary model plus ordered fallbacks for one role. The run engine's LLM
/// calls always resolve through a role (`planner` for command generation,
/// `validator` for output validation, `memory_writer` for distillation),
/// never a bare model string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Format: "provider_id/model_name".
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub require_json: bool,
    #[serde(default)]
    pub fallbacks: Vec<FallbackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub model: String,
    #[serde(default)]
    pub require_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    None,
}

fn d_timeout_ms() -> u64 {
    20_000
}
fn d_2() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_config_default_has_no_roles() {
        let config = LlmConfig::default();
        assert!(config.roles.is_empty());
        assert_eq!(config.default_timeout_ms, 20_000);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn role_config_deserializes_with_fallbacks() {
        let json = r#"{
            "roles": {
                "planner": {
                    "model": "openai/gpt-4o",
                    "require_json": true,
                    "fallbacks": [{"model": "anthropic/claude-sonnet", "require_json": true}]
                }
            }
        }"#;
        let config: LlmConfig = serde_json::from_str(json).unwrap();
        let planner = config.roles.get("planner").unwrap();
        assert_eq!(planner.model, "openai/gpt-4o");
        assert!(planner.require_json);
        assert_eq!(planner.fallbacks.len(), 1);
        assert_eq!(planner.fallbacks[0].model, "anthropic/claude-sonnet");
    }

    #[test]
    fn provider_config_deserializes() {
        let json = r#"{
            "providers": [{
                "id": "openai",
                "kind": "openai_compat",
                "base_url": "https://api.openai.com/v1",
                "auth": {"mode": "api_key", "env": "OPENAI_API_KEY"}
            }]
        }"#;
        let config: LlmConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].kind, ProviderKind::OpenaiCompat);
        assert_eq!(config.providers[0].auth.env.as_deref(), Some("OPENAI_API_KEY"));
    }

    #[test]
    fn auth_mode_defaults_to_api_key() {
        let auth = AuthConfig::default();
        assert_eq!(auth.mode, AuthMode::ApiKey);
    }
}
