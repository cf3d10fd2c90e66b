//! Shared application state handed to every queue consumer.

use std::sync::Arc;

use sa_domain::config::Config;
use sa_engine::RunEngine;
use sa_memory::SecretDecryptor;
use sa_policy::ApprovalStore;
use sa_providers::ProviderRegistry;
use sa_queue::QueueStore;
use sa_store::{CancelMap, MemoryStore, MessageStore, RunStore, TriggerStore};
use sa_tools::ToolRegistry;

use crate::delivery::ChannelAdapter;
use crate::settings::UserSettingsStore;

pub struct AppState {
    pub config: Arc<Config>,
    pub run_store: Arc<RunStore>,
    pub message_store: Arc<MessageStore>,
    pub memory_store: Arc<MemoryStore>,
    pub trigger_store: Arc<TriggerStore>,
    pub queue_store: Arc<QueueStore>,
    pub cancel_map: Arc<CancelMap>,
    pub approvals: Arc<ApprovalStore>,
    pub tools: Arc<ToolRegistry>,
    pub llm: Arc<ProviderRegistry>,
    pub engine: Arc<RunEngine>,
    pub user_settings: Arc<UserSettingsStore>,
    pub decryptor: Arc<dyn SecretDecryptor>,
    pub delivery: Arc<dyn ChannelAdapter>,
}
