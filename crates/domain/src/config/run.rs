use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run engine configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Cooperative tasks a single worker process runs concurrently.
    #[serde(default = "d_worker_concurrency")]
    pub worker_concurrency: u32,
    /// Transcript messages kept in-context before older turns are dropped.
    #[serde(default = "d_max_turns_per_context")]
    pub max_turns_per_context: u32,
    /// Messages handed to the memory writer per distillation pass.
    #[serde(default = "d_memory_writer_max_messages")]
    pub memory_writer_max_messages: u32,
    #[serde(default = "d_run_max_iterations")]
    pub run_max_iterations: u32,
    #[serde(default = "d_run_min_iterations")]
    pub run_min_iterations: u32,
    /// Absolute ceiling `set_run_limits` may never extend past.
    #[serde(default = "d_run_max_iterations_hard_cap")]
    pub run_max_iterations_hard_cap: u32,
    /// Max transcript entries retained before compaction.
    #[serde(default = "d_run_transcript_limit")]
    pub run_transcript_limit: u32,
    /// Max transcript tokens retained before compaction.
    #[serde(default = "d_run_transcript_token_limit")]
    pub run_transcript_token_limit: u32,
    /// Retries allowed for an unparsable LLM command before the run fails.
    #[serde(default = "d_run_max_json_retries")]
    pub run_max_json_retries: u32,
    /// Retries allowed per distinct tool before `limitationRequired` is set.
    #[serde(default = "d_run_max_tool_retries")]
    pub run_max_tool_retries: u32,
    #[serde(default = "d_run_max_runtime_ms")]
    pub run_max_runtime_ms: u64,
    /// Log full prompt/response bodies at debug level.
    #[serde(default)]
    pub run_debug_prompts: bool,
    /// Env var holding the symmetric key used to encrypt stored secrets.
    #[serde(default = "d_encryption_key_env")]
    pub encryption_key_env: String,
    pub llm_base_url: Option<String>,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    /// Trigger dispatcher scan cadence.
    #[serde(default = "d_trigger_poll_interval_ms")]
    pub trigger_poll_interval_ms: u64,
    /// Graceful-shutdown window for in-flight queue jobs to drain.
    #[serde(default = "d_queue_drain_timeout_ms")]
    pub queue_drain_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: d_worker_concurrency(),
            max_turns_per_context: d_max_turns_per_context(),
            memory_writer_max_messages: d_memory_writer_max_messages(),
            run_max_iterations: d_run_max_iterations(),
            run_min_iterations: d_run_min_iterations(),
            run_max_iterations_hard_cap: d_run_max_iterations_hard_cap(),
            run_transcript_limit: d_run_transcript_limit(),
            run_transcript_token_limit: d_run_transcript_token_limit(),
            run_max_json_retries: d_run_max_json_retries(),
            run_max_tool_retries: d_run_max_tool_retries(),
            run_max_runtime_ms: d_run_max_runtime_ms(),
            run_debug_prompts: false,
            encryption_key_env: d_encryption_key_env(),
            llm_base_url: None,
            log_level: d_log_level(),
            trigger_poll_interval_ms: d_trigger_poll_interval_ms(),
            queue_drain_timeout_ms: d_queue_drain_timeout_ms(),
        }
    }
}

impl RunConfig {
    /// `set_run_limits` may never request an iteration ceiling above this.
    pub fn clamp_requested_iterations(&self, requested: u32) -> u32 {
        requested.min(self.run_max_iterations_hard_cap)
    }
}

fn d_worker_concurrency() -> u32 {
    5
}
fn d_max_turns_per_context() -> u32 {
    40
}
fn d_memory_writer_max_messages() -> u32 {
    20
}
fn d_run_max_iterations() -> u32 {
    25
}
fn d_run_min_iterations() -> u32 {
    3
}
fn d_run_max_iterations_hard_cap() -> u32 {
    100
}
fn d_run_transcript_limit() -> u32 {
    200
}
fn d_run_transcript_token_limit() -> u32 {
    32_000
}
fn d_run_max_json_retries() -> u32 {
    3
}
fn d_run_max_tool_retries() -> u32 {
    3
}
fn d_run_max_runtime_ms() -> u64 {
    15 * 60 * 1000
}
fn d_encryption_key_env() -> String {
    "SA_ENCRYPTION_KEY".into()
}
fn d_log_level() -> String {
    "info".into()
}
fn d_trigger_poll_interval_ms() -> u64 {
    5_000
}
fn d_queue_drain_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.worker_concurrency, 5);
        assert_eq!(cfg.run_min_iterations, 3);
        assert_eq!(cfg.run_max_iterations, 25);
        assert_eq!(cfg.run_max_iterations_hard_cap, 100);
    }

    #[test]
    fn clamp_requested_iterations_caps_at_hard_cap() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.clamp_requested_iterations(9_999), 100);
        assert_eq!(cfg.clamp_requested_iterations(40), 40);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: RunConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.worker_concurrency, 5);
        assert!(!cfg.run_debug_prompts);
        assert!(cfg.llm_base_url.is_none());
    }

    #[test]
    fn deserialize_overrides() {
        let toml_str = r#"
            worker_concurrency = 8
            run_max_iterations = 50
            run_debug_prompts = true
            llm_base_url = "http://localhost:11434"
        "#;
        let cfg: RunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.worker_concurrency, 8);
        assert_eq!(cfg.run_max_iterations, 50);
        assert!(cfg.run_debug_prompts);
        assert_eq!(cfg.llm_base_url.as_deref(), Some("http://localhost:11434"));
    }
}
