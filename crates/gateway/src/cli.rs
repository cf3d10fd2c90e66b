//! Command-line surface and configuration loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sa_domain::config::Config;

const DEFAULT_CONFIG_PATH: &str = "serialrunner.toml";

#[derive(Parser)]
#[command(name = "serialrunner", about = "Run-engine worker process")]
pub struct Cli {
    /// Path to the TOML config file (default: ./serialrunner.toml, or
    /// $SA_CONFIG when set).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker (default when no subcommand is given).
    Serve,
    #[command(subcommand)]
    Config(ConfigCommand),
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the resolved configuration.
    Show,
}

/// Load the TOML config (missing file falls back to defaults) and apply the
/// environment overrides documented for the run engine.
pub fn load_config(path_override: Option<&PathBuf>) -> anyhow::Result<(Config, String)> {
    let path = path_override
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("SA_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let mut config = if std::path::Path::new(&path).exists() {
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing {path}"))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok((config, path))
}

macro_rules! env_override {
    ($var:expr, $field:expr) => {
        if let Ok(raw) = std::env::var($var) {
            match raw.parse() {
                Ok(value) => $field = value,
                Err(_) => tracing::warn!(var = $var, value = %raw, "ignoring unparsable env override"),
            }
        }
    };
}

/// Environment variables win over the config file, one per run-engine knob.
pub fn apply_env_overrides(config: &mut Config) {
    env_override!("SA_WORKER_CONCURRENCY", config.run.worker_concurrency);
    env_override!("SA_MAX_TURNS_PER_CONTEXT", config.run.max_turns_per_context);
    env_override!("SA_MEMORY_WRITER_MAX_MESSAGES", config.run.memory_writer_max_messages);
    env_override!("SA_RUN_MAX_ITERATIONS", config.run.run_max_iterations);
    env_override!("SA_RUN_MIN_ITERATIONS", config.run.run_min_iterations);
    env_override!("SA_RUN_MAX_ITERATIONS_HARD_CAP", config.run.run_max_iterations_hard_cap);
    env_override!("SA_RUN_TRANSCRIPT_LIMIT", config.run.run_transcript_limit);
    env_override!("SA_RUN_TRANSCRIPT_TOKEN_LIMIT", config.run.run_transcript_token_limit);
    env_override!("SA_RUN_MAX_JSON_RETRIES", config.run.run_max_json_retries);
    env_override!("SA_RUN_MAX_TOOL_RETRIES", config.run.run_max_tool_retries);
    env_override!("SA_RUN_MAX_RUNTIME_MS", config.run.run_max_runtime_ms);
    env_override!("SA_RUN_DEBUG_PROMPTS", config.run.run_debug_prompts);
    env_override!("SA_LOG_LEVEL", config.run.log_level);
    if let Ok(url) = std::env::var("SA_LLM_BASE_URL") {
        config.run.llm_base_url = Some(url);
    }
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

/// Print every validation issue; returns `false` when any is an error.
pub fn validate(config: &Config, path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{path}: OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == sa_domain::config::ConfigSeverity::Error)
}
