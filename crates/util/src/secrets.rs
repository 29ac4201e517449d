//! Secret retrieval for provider credentials.
//!
//! Credential references in environment documents are either a bare secret
//! name (`stripe_live_token`) or a string containing `${secret:NAME}` /
//! `${env:NAME}` placeholders. Secrets come from a [`SecretStore`]; the
//! process-level default is chosen with [`SECRETS_BACKEND_ENV_VAR`].

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::debug;

static SERVICE: &str = "conduit";
/// Environment variable used to select the secret resolution backend.
pub const SECRETS_BACKEND_ENV_VAR: &str = "CONDUIT_SECRETS_BACKEND";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(env|secret):([\w.+-]*)\}").expect("placeholder regex should compile"));

/// Secret resolution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsBackend {
    /// Resolve secrets via the OS keychain (`keyring`).
    Keychain,
    /// Resolve secret `NAME` from process environment variable `NAME`.
    Environment,
}

impl SecretsBackend {
    /// Parses a configured backend name. Anything other than `env` selects the keychain.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "env" | "environment" => Self::Environment,
            _ => Self::Keychain,
        }
    }

    /// Builds the store backing this selection.
    pub fn store(self) -> Arc<dyn SecretStore> {
        match self {
            Self::Keychain => Arc::new(KeychainSecretStore::default()),
            Self::Environment => Arc::new(EnvSecretStore),
        }
    }
}

/// Determine the currently configured secrets backend.
pub fn secrets_backend() -> SecretsBackend {
    let configured_value = std::env::var(SECRETS_BACKEND_ENV_VAR).ok();
    SecretsBackend::parse(configured_value.as_deref())
}

/// Opaque secret-retrieval capability.
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    fn get(&self, name: &str) -> Result<String, SecretError>;
}

/// OS keychain store, one entry per secret under a shared service name.
#[derive(Debug, Clone)]
pub struct KeychainSecretStore {
    service: String,
}

impl Default for KeychainSecretStore {
    fn default() -> Self {
        Self {
            service: SERVICE.to_string(),
        }
    }
}

impl KeychainSecretStore {
    /// Store a secret in the OS keychain.
    pub fn set(&self, name: &str, value: &str) -> Result<(), SecretError> {
        let entry = self.entry(name)?;
        entry.set_password(value).map_err(|error| SecretError::Keyring {
            name: name.to_string(),
            error: error.to_string(),
        })?;
        debug!(secret = name, "stored secret in keychain");
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, SecretError> {
        keyring::Entry::new(&self.service, name).map_err(|error| SecretError::Keyring {
            name: name.to_string(),
            error: error.to_string(),
        })
    }
}

impl SecretStore for KeychainSecretStore {
    fn get(&self, name: &str) -> Result<String, SecretError> {
        self.entry(name)?.get_password().map_err(|error| SecretError::Missing {
            name: name.to_string(),
            error: error.to_string(),
        })
    }
}

/// Reads secret `NAME` from the environment variable `NAME`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Result<String, SecretError> {
        std::env::var(name).map_err(|error| SecretError::Missing {
            name: name.to_string(),
            error: error.to_string(),
        })
    }
}

/// Fixed in-memory secrets, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Result<String, SecretError> {
        self.secrets.get(name).cloned().ok_or_else(|| SecretError::Missing {
            name: name.to_string(),
            error: "not present in static store".to_string(),
        })
    }
}

/// Resolves one credential reference.
///
/// A reference without placeholders is a bare secret name looked up in
/// `store`. Otherwise each `${secret:NAME}` is looked up in `store` and each
/// `${env:NAME}` in the process environment, and the surrounding text is kept.
pub fn resolve_reference(store: &dyn SecretStore, reference: &str) -> Result<String, SecretError> {
    let reference = reference.trim();
    if !PLACEHOLDER.is_match(reference) {
        if reference.is_empty() {
            return Err(SecretError::Missing {
                name: String::new(),
                error: "empty credential reference".to_string(),
            });
        }
        return store.get(reference);
    }

    let mut failure = None;
    let resolved = PLACEHOLDER.replace_all(reference, |captures: &Captures| {
        let (source, name) = (&captures[1], &captures[2]);
        let value = match source {
            "env" => std::env::var(name).map_err(|_| SecretError::MissingEnvVar { name: name.to_string() }),
            _ => store.get(name),
        };
        match value {
            Ok(value) => {
                debug!(source, name, "interpolated credential -> [REDACTED]");
                value
            }
            Err(error) => {
                failure.get_or_insert(error);
                String::new()
            }
        }
    });
    match failure {
        Some(error) => Err(error),
        None => Ok(resolved.into_owned()),
    }
}

/// Errors that can occur during secret retrieval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },

    #[error("Missing secret: {name} - {error}")]
    Missing { name: String, error: String },

    #[error("Keyring error for {name}: {error}")]
    Keyring { name: String, error: String },
}

impl SecretError {
    pub fn name(&self) -> &str {
        match self {
            Self::MissingEnvVar { name } | Self::Missing { name, .. } | Self::Keyring { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_backend_defaults_to_keychain_when_env_var_is_missing() {
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, None::<&str>, || {
            assert_eq!(secrets_backend(), SecretsBackend::Keychain);
        });
    }

    #[test]
    fn secrets_backend_uses_environment_when_configured() {
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, Some("env"), || {
            assert_eq!(secrets_backend(), SecretsBackend::Environment);
        });
    }

    #[test]
    fn env_store_reads_process_environment() {
        temp_env::with_var("CONDUIT_TEST_SECRET", Some("test-secret-value"), || {
            let resolved = EnvSecretStore.get("CONDUIT_TEST_SECRET").expect("secret resolves from environment");
            assert_eq!(resolved, "test-secret-value");
        });
    }

    #[test]
    fn bare_reference_is_a_secret_name() {
        let store = StaticSecretStore::new().with("stripe_token", "sk_test_1");
        assert_eq!(resolve_reference(&store, "stripe_token").unwrap(), "sk_test_1");
        let error = resolve_reference(&store, "other").unwrap_err();
        assert_eq!(error.name(), "other");
    }

    #[test]
    fn placeholders_interpolate_secret_and_env_values() {
        let store = StaticSecretStore::new().with("user", "alice");
        temp_env::with_var("CONDUIT_TEST_REGION", Some("eu"), || {
            let resolved = resolve_reference(&store, "${secret:user}@${env:CONDUIT_TEST_REGION}").unwrap();
            assert_eq!(resolved, "alice@eu");
        });
    }

    #[test]
    fn missing_env_placeholder_is_reported() {
        let store = StaticSecretStore::new();
        temp_env::with_var("CONDUIT_TEST_ABSENT", None::<&str>, || {
            let error = resolve_reference(&store, "${env:CONDUIT_TEST_ABSENT}").unwrap_err();
            assert_eq!(
                error,
                SecretError::MissingEnvVar {
                    name: "CONDUIT_TEST_ABSENT".into()
                }
            );
        });
    }
}
