//! Per-user memory-writer settings and the key-decryption seam.
//!
//! The encryption primitive itself is an out-of-core collaborator — this
//! crate only defines the interface a caller plugs a real decryptor into.

use sa_domain::error::{Error, MemoryWriterSkip, Result};

/// What the memory writer needs to know about a user before it may run.
#[derive(Debug, Clone)]
pub struct UserMemorySettings {
    pub user_id: String,
    pub memory_enabled: bool,
    /// Ciphertext of the user's LLM API key, if one is configured.
    pub encrypted_api_key: Option<String>,
    /// Provider id the decrypted key should be used with, e.g. `"openai"`.
    pub provider_id: Option<String>,
}

/// Decrypts a user's stored API key ciphertext.
///
/// Implemented outside this crate against whatever symmetric-key scheme the
/// deployment uses (`RunConfig::encryption_key_env` names the key source).
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Validate settings and return the decrypted key, or the specific skip
/// reason that blocked the pass.
pub fn resolve_api_key(
    settings: &UserMemorySettings,
    decryptor: &dyn SecretDecryptor,
) -> std::result::Result<String, MemoryWriterSkip> {
    if !settings.memory_enabled {
        return Err(MemoryWriterSkip::MemoryDisabled);
    }
    let Some(ciphertext) = settings.encrypted_api_key.as_deref() else {
        return Err(MemoryWriterSkip::MissingApiKey);
    };
    if settings.provider_id.as_deref().unwrap_or("").is_empty() {
        return Err(MemoryWriterSkip::MissingApiKey);
    }
    match decryptor.decrypt(ciphertext) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(MemoryWriterSkip::InvalidApiKey),
    }
}

/// Test/dev decryptor that returns the ciphertext unchanged. Never used in
/// a real deployment; `crates/gateway` wires in the actual scheme.
pub struct IdentityDecryptor;

impl SecretDecryptor for IdentityDecryptor {
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        if ciphertext.is_empty() {
            return Err(Error::Config("empty ciphertext".into()));
        }
        Ok(ciphertext.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, key: Option<&str>, provider: Option<&str>) -> UserMemorySettings {
        UserMemorySettings {
            user_id: "u1".into(),
            memory_enabled: enabled,
            encrypted_api_key: key.map(String::from),
            provider_id: provider.map(String::from),
        }
    }

    #[test]
    fn disabled_memory_skips() {
        let s = settings(false, Some("ct"), Some("openai"));
        assert_eq!(
            resolve_api_key(&s, &IdentityDecryptor).unwrap_err(),
            MemoryWriterSkip::MemoryDisabled
        );
    }

    #[test]
    fn missing_key_skips() {
        let s = settings(true, None, Some("openai"));
        assert_eq!(
            resolve_api_key(&s, &IdentityDecryptor).unwrap_err(),
            MemoryWriterSkip::MissingApiKey
        );
    }

    #[test]
    fn missing_provider_skips_as_missing_key() {
        let s = settings(true, Some("ct"), None);
        assert_eq!(
            resolve_api_key(&s, &IdentityDecryptor).unwrap_err(),
            MemoryWriterSkip::MissingApiKey
        );
    }

    #[test]
    fn enabled_with_full_metadata_resolves() {
        let s = settings(true, Some("plaintext-key"), Some("openai"));
        assert_eq!(resolve_api_key(&s, &IdentityDecryptor).unwrap(), "plaintext-key");
    }

    struct FailingDecryptor;
    impl SecretDecryptor for FailingDecryptor {
        fn decrypt(&self, _ciphertext: &str) -> Result<String> {
            Err(Error::Config("bad key".into()))
        }
    }

    #[test]
    fn decrypt_failure_reports_invalid_key() {
        let s = settings(true, Some("ct"), Some("openai"));
        assert_eq!(
            resolve_api_key(&s, &FailingDecryptor).unwrap_err(),
            MemoryWriterSkip::InvalidApiKey
        );
    }
}
