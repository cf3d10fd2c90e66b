//! AppState construction shared by `serve` and the tests: validate config,
//! initialize every subsystem, wire the run engine.

use std::sync::Arc;

use anyhow::Context;
use sa_domain::config::{Config, ConfigSeverity};
use sa_engine::RunEngine;
use sa_policy::ApprovalStore;
use sa_providers::ProviderRegistry;
use sa_queue::QueueStore;
use sa_store::{CancelMap, MemoryStore, MessageStore, RunStore, TriggerStore};
use sa_tools::builtin::weather::WeatherTool;
use sa_tools::builtin::web_search::WebSearchTool;
use sa_tools::ToolRegistry;

use crate::delivery::LoggingAdapter;
use crate::settings::{EnvKeyDecryptor, UserSettingsStore};
use crate::state::AppState;

/// Pending tool approvals are denied after this long without a decision.
const APPROVAL_TIMEOUT_MINUTES: i64 = 15;

/// Validate config and return a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let llm = Arc::new(ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?);
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — runs will fail at the first planner call");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    let mut tools = ToolRegistry::new();
    tools.register(WeatherTool::definition());
    tools.register(WebSearchTool::definition());
    let tools = Arc::new(tools);
    tracing::info!("tool registry ready");

    let run_store = Arc::new(RunStore::new());
    let message_store = Arc::new(MessageStore::new());
    let memory_store = Arc::new(MemoryStore::new());
    let trigger_store = Arc::new(TriggerStore::new());
    let queue_store = Arc::new(QueueStore::new());
    let cancel_map = Arc::new(CancelMap::new());
    let approvals = Arc::new(ApprovalStore::new(chrono::Duration::minutes(APPROVAL_TIMEOUT_MINUTES)));

    let engine = Arc::new(RunEngine {
        run_store: run_store.clone(),
        message_store: message_store.clone(),
        memory_store: memory_store.clone(),
        trigger_store: trigger_store.clone(),
        queue_store: queue_store.clone(),
        cancel_map: cancel_map.clone(),
        tools: tools.clone(),
        config: config.run.clone(),
        approvals: approvals.clone(),
        registry: llm.clone(),
        roles: config.llm.roles.clone(),
        agent_profiles: config.agents.clone(),
    });
    tracing::info!("run engine ready");

    Ok(AppState {
        decryptor: Arc::new(EnvKeyDecryptor::new(config.run.encryption_key_env.clone())),
        config: config.clone(),
        run_store,
        message_store,
        memory_store,
        trigger_store,
        queue_store,
        cancel_map,
        approvals,
        tools,
        llm,
        engine,
        user_settings: Arc::new(UserSettingsStore::new()),
        delivery: Arc::new(LoggingAdapter),
    })
}
