//! Primary/fallback chat resolution over a role's model chain.
//!
//! A [`RoleConfig`] names one primary `"provider_id/model_name"` spec and an
//! ordered list of fallbacks. [`chat_with_fallback`] tries the primary, and on
//! any [`Error::Provider`]/[`Error::Http`]/[`Error::Timeout`] falls through
//! the chain in order, emitting [`TraceEvent::LlmFallback`] for each hop.
//! Any other error (e.g. a malformed request) is not retried against a
//! fallback since a different model won't fix it.

use crate::registry::ProviderRegistry;
use crate::traits::{ChatRequest, ChatResponse};
use sa_domain::error::{Error, Result};
use sa_domain::trace::TraceEvent;

fn split_model_spec(spec: &str) -> (&str, &str) {
    match spec.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (spec, spec),
    }
}

fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Provider { .. } | Error::Http(_) | Error::Timeout(_))
}

/// Resolve `role` to a provider/model chain and run `req` against it,
/// trying the primary model first and each configured fallback in order.
///
/// Returns the first successful response, or the last error encountered if
/// every model in the chain fails.
pub async fn chat_with_fallback(
    registry: &ProviderRegistry,
    roles: &std::collections::HashMap<String, sa_domain::config::RoleConfig>,
    role: &str,
    mut req: ChatRequest,
) -> Result<ChatResponse> {
    let role_cfg = roles
        .get(role)
        .ok_or_else(|| Error::Config(format!("no role configured for '{role}'")))?;

    let mut chain: Vec<(String, bool)> = vec![(role_cfg.model.clone(), role_cfg.require_json)];
    chain.extend(
        role_cfg
            .fallbacks
            .iter()
            .map(|f| (f.model.clone(), f.require_json)),
    );

    let (first_provider, first_model) = split_model_spec(&chain[0].0);
    let mut last_hop = (first_provider.to_string(), first_model.to_string());
    let mut last_err: Option<Error> = None;

    for (idx, (spec, require_json)) in chain.iter().enumerate() {
        let (provider_id, model_name) = split_model_spec(spec);

        let provider = match registry.get(provider_id) {
            Some(p) => p,
            None => {
                last_err = Some(Error::Config(format!(
                    "role '{role}' references unknown provider '{provider_id}'"
                )));
                continue;
            }
        };

        if idx > 0 {
            TraceEvent::LlmFallback {
                from_provider: last_hop.0.clone(),
                from_model: last_hop.1.clone(),
                to_provider: provider_id.to_string(),
                to_model: model_name.to_string(),
                reason: last_err
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            }
            .emit();
        }

        req.model = Some(model_name.to_string());
        req.json_mode = req.json_mode || *require_json;

        match provider.chat(req.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                let retryable = is_retryable(&e);
                last_hop = (provider_id.to_string(), model_name.to_string());
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Config(format!("empty fallback chain for role '{role}'"))))
}
