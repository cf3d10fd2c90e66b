//! Memory Writer orchestration: loads settings, prompts an LLM,
//! parses and applies ops, returns a job-safe summary.

use std::collections::HashMap;

use sa_domain::config::RoleConfig;
use sa_domain::entities::Message as StoredMessage;
use sa_domain::error::MemoryWriterSkip;
use sa_domain::tool::Message;
use sa_domain::trace::TraceEvent;
use sa_providers::{chat_with_fallback, ChatRequest, ProviderRegistry};
use sa_store::MemoryStore;

use crate::apply::apply_batch;
use crate::op::parse_ops;
use crate::prompt::{build_segment_prompt, render_active_memories, system_prompt};
use crate::settings::{resolve_api_key, SecretDecryptor, UserMemorySettings};

pub const MEMORY_WRITER_ROLE: &str = "memory_writer";
/// Raw model response retained for observability, capped to this many chars.
const RAW_RESPONSE_EXCERPT_CHARS: usize = 2_000;
/// Budget for the "current active memories" block injected into the prompt.
const ACTIVE_MEMORIES_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WriteSummary {
    pub applied: usize,
    pub skipped: usize,
    pub archived: usize,
    pub raw_response_excerpt: String,
}

/// Run one memory-write pass for a user over a message segment.
///
/// Returns `Ok(summary)` on a completed (possibly no-op) pass, or
/// `Err(skip_reason)` when the pass was skipped — this does not
/// fail the enclosing job, the caller records the skip and moves on.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    store: &MemoryStore,
    registry: &ProviderRegistry,
    roles: &HashMap<String, RoleConfig>,
    settings: &UserMemorySettings,
    decryptor: &dyn SecretDecryptor,
    segment: &[StoredMessage],
) -> std::result::Result<WriteSummary, MemoryWriterSkip> {
    // Decryption only validates the key is usable before spending a model
    // call; the registry resolves the actual provider credentials itself.
    let _api_key = resolve_api_key(settings, decryptor)?;

    let active = store.by_user(&settings.user_id);
    let rendered = render_active_memories(&active, ACTIVE_MEMORIES_MAX_CHARS);
    let segment_text = segment
        .iter()
        .map(|m| format!("{:?}: {}", m.direction, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let request = ChatRequest {
        messages: vec![
            Message::system(system_prompt()),
            Message::user(build_segment_prompt(&segment_text, &rendered)),
        ],
        json_mode: true,
        ..Default::default()
    };

    let response = chat_with_fallback(registry, roles, MEMORY_WRITER_ROLE, request)
        .await
        .map_err(|_| MemoryWriterSkip::InvalidApiKey)?;

    let excerpt: String = response.content.chars().take(RAW_RESPONSE_EXCERPT_CHARS).collect();

    let ops = match parse_ops(&response.content) {
        Ok(ops) => ops,
        Err(_) => {
            TraceEvent::MemoryWriteSkipped {
                agent_id: settings.user_id.clone(),
                reason: "unparsable_model_response".into(),
            }
            .emit();
            return Ok(WriteSummary {
                applied: 0,
                skipped: 0,
                archived: 0,
                raw_response_excerpt: excerpt,
            });
        }
    };

    let applied = apply_batch(store, &settings.user_id, ops);
    TraceEvent::MemoryItemsWritten {
        agent_id: settings.user_id.clone(),
        module: "mixed".into(),
        count: applied.applied,
    }
    .emit();

    Ok(WriteSummary {
        applied: applied.applied,
        skipped: applied.skipped,
        archived: applied.archived,
        raw_response_excerpt: excerpt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::IdentityDecryptor;
    use sa_domain::entities::Message as StoredMessage;

    fn settings(enabled: bool) -> UserMemorySettings {
        UserMemorySettings {
            user_id: "u1".into(),
            memory_enabled: enabled,
            encrypted_api_key: Some("plaintext-key".into()),
            provider_id: Some("openai".into()),
        }
    }

    #[tokio::test]
    async fn disabled_memory_returns_skip_without_calling_llm() {
        let store = MemoryStore::new();
        let registry = ProviderRegistry::default();
        let roles = HashMap::new();
        let segment = vec![StoredMessage::inbound("u1", "web", "hello")];

        let result = run(
            &store,
            &registry,
            &roles,
            &settings(false),
            &IdentityDecryptor,
            &segment,
        )
        .await;

        assert_eq!(result.unwrap_err(), MemoryWriterSkip::MemoryDisabled);
    }
}
