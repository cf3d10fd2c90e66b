//! Per-user memory-writer settings and the key-decryption wiring.

use std::collections::HashMap;

use parking_lot::RwLock;
use sa_domain::error::{Error, Result};
use sa_memory::{SecretDecryptor, UserMemorySettings};

/// In-process user settings, keyed by user id. A user with no row is
/// treated as memory-disabled, which the memory writer reports as a
/// structured skip rather than a job failure.
#[derive(Default)]
pub struct UserSettingsStore {
    inner: RwLock<HashMap<String, UserMemorySettings>>,
}

impl UserSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, settings: UserMemorySettings) {
        self.inner.write().insert(settings.user_id.clone(), settings);
    }

    pub fn get(&self, user_id: &str) -> UserMemorySettings {
        self.inner.read().get(user_id).cloned().unwrap_or(UserMemorySettings {
            user_id: user_id.to_string(),
            memory_enabled: false,
            encrypted_api_key: None,
            provider_id: None,
        })
    }
}

/// Decryptor bound to the symmetric key named by
/// `RunConfig::encryption_key_env`. The cipher itself is supplied by the
/// deployment; this binary only accepts the `plain:`-prefixed ciphertext
/// form used by development setups and refuses anything else, so a
/// misconfigured production key surfaces as `invalid_api_key` instead of a
/// silent passthrough.
pub struct EnvKeyDecryptor {
    key_env: String,
}

impl EnvKeyDecryptor {
    pub fn new(key_env: impl Into<String>) -> Self {
        Self { key_env: key_env.into() }
    }
}

impl SecretDecryptor for EnvKeyDecryptor {
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        if std::env::var(&self.key_env).map(|v| v.is_empty()).unwrap_or(true) {
            return Err(Error::Config(format!("{} is not set", self.key_env)));
        }
        ciphertext
            .strip_prefix("plain:")
            .map(str::to_string)
            .ok_or_else(|| Error::Config("unsupported ciphertext format".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_defaults_to_memory_disabled() {
        let store = UserSettingsStore::new();
        let settings = store.get("nobody");
        assert!(!settings.memory_enabled);
        assert!(settings.encrypted_api_key.is_none());
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = UserSettingsStore::new();
        store.upsert(UserMemorySettings {
            user_id: "u1".into(),
            memory_enabled: true,
            encrypted_api_key: Some("plain:sk-test".into()),
            provider_id: Some("openai".into()),
        });
        let settings = store.get("u1");
        assert!(settings.memory_enabled);
        assert_eq!(settings.provider_id.as_deref(), Some("openai"));
    }

    #[test]
    fn decryptor_requires_the_key_env() {
        let decryptor = EnvKeyDecryptor::new("SA_TEST_MISSING_KEY");
        assert!(decryptor.decrypt("plain:abc").is_err());
    }

    #[test]
    fn decryptor_accepts_plain_prefix_when_key_present() {
        std::env::set_var("SA_TEST_PRESENT_KEY", "k");
        let decryptor = EnvKeyDecryptor::new("SA_TEST_PRESENT_KEY");
        assert_eq!(decryptor.decrypt("plain:abc").unwrap(), "abc");
        assert!(decryptor.decrypt("abc").is_err());
        std::env::remove_var("SA_TEST_PRESENT_KEY");
    }
}
