use std::{env, fs, path::Path, path::PathBuf};

use anyhow::Context;
use conduit_util::masking::DEFAULT_MASK_TOKEN;
use conduit_util::path_processing::{conduit_config_dir, conduit_data_dir};
use conduit_util::secrets::{SECRETS_BACKEND_ENV_VAR, SecretsBackend};
use conduit_util::{expand_tilde, path_from_env_or};
use serde::{Deserialize, Serialize};

/// Overrides the gateway configuration file location.
pub const CONFIG_PATH_ENV: &str = "CONDUIT_CONFIG_PATH";
/// Overrides the catalog location (file or directory).
pub const CATALOG_PATH_ENV: &str = "CONDUIT_CATALOG_PATH";
/// Overrides the audit log directory.
pub const AUDIT_DIR_ENV: &str = "CONDUIT_AUDIT_DIR";

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8787";

fn default_mask_token() -> String {
    DEFAULT_MASK_TOKEN.to_string()
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

/// Process-level gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Catalog file or directory of provider documents.
    #[serde(default)]
    pub catalog_path: Option<String>,
    /// Directory holding the JSONL audit partitions.
    #[serde(default)]
    pub audit_dir: Option<String>,
    #[serde(default = "default_mask_token")]
    pub mask_token: String,
    /// Sensitive field names masked for every provider.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    /// `keychain` or `env`; the environment variable wins when set.
    #[serde(default)]
    pub secrets_backend: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            audit_dir: None,
            mask_token: default_mask_token(),
            sensitive_fields: Vec::new(),
            secrets_backend: None,
            bind_address: default_bind_address(),
        }
    }
}

impl GatewayConfig {
    /// Loads the configuration from [`default_config_path`]; a missing file yields defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path(&default_config_path())
    }

    /// Loads a JSON or YAML configuration file; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("read gateway config {}", path.display()))?;
        let config = if is_json_path(path) {
            serde_json::from_str(&content).with_context(|| format!("parse gateway config {}", path.display()))?
        } else {
            serde_yaml::from_str(&content).with_context(|| format!("parse gateway config {}", path.display()))?
        };
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// `CONDUIT_CATALOG_PATH`, then `catalog_path`, then `<config_dir>/conduit/catalog.yaml`.
    pub fn catalog_path(&self) -> PathBuf {
        path_from_env_or(CATALOG_PATH_ENV, || match &self.catalog_path {
            Some(path) if !path.trim().is_empty() => expand_tilde(path),
            _ => conduit_config_dir().join("catalog.yaml"),
        })
    }

    /// `CONDUIT_AUDIT_DIR`, then `audit_dir`, then `<data_dir>/conduit/audit`.
    pub fn audit_dir(&self) -> PathBuf {
        path_from_env_or(AUDIT_DIR_ENV, || match &self.audit_dir {
            Some(path) if !path.trim().is_empty() => expand_tilde(path),
            _ => conduit_data_dir().join("audit"),
        })
    }

    /// `CONDUIT_SECRETS_BACKEND`, then `secrets_backend`, defaulting to the keychain.
    pub fn secrets_backend(&self) -> SecretsBackend {
        let configured = env::var(SECRETS_BACKEND_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.secrets_backend.clone());
        SecretsBackend::parse(configured.as_deref())
    }
}

/// Get the default path for the gateway configuration file.
pub fn default_config_path() -> PathBuf {
    path_from_env_or(CONFIG_PATH_ENV, || conduit_config_dir().join("gateway.json"))
}

pub(crate) fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_path_honors_environment_override() {
        let override_path = "~/custom/conduit/gateway.json";
        temp_env::with_var(CONFIG_PATH_ENV, Some(override_path), || {
            assert_eq!(default_config_path(), expand_tilde(override_path));
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = GatewayConfig::load_from_path(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.mask_token, "[MASKED]");
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
    }

    #[test]
    fn yaml_and_json_files_load() {
        let temp_dir = TempDir::new().unwrap();
        let yaml_path = temp_dir.path().join("gateway.yaml");
        fs::write(&yaml_path, "audit_dir: /var/lib/conduit\nsensitive_fields: [iban]\n").unwrap();
        let config = GatewayConfig::load_from_path(&yaml_path).unwrap();
        assert_eq!(config.audit_dir.as_deref(), Some("/var/lib/conduit"));
        assert_eq!(config.sensitive_fields, vec!["iban"]);

        let json_path = temp_dir.path().join("gateway.json");
        config.save_to_path(&json_path).unwrap();
        assert_eq!(GatewayConfig::load_from_path(&json_path).unwrap(), config);
    }

    #[test]
    fn environment_overrides_configured_paths() {
        let config = GatewayConfig {
            audit_dir: Some("/from/config".into()),
            ..GatewayConfig::default()
        };
        temp_env::with_vars([(AUDIT_DIR_ENV, Some("/from/env")), (CATALOG_PATH_ENV, None)], || {
            assert_eq!(config.audit_dir(), PathBuf::from("/from/env"));
            assert!(config.catalog_path().ends_with("conduit/catalog.yaml"));
        });
        temp_env::with_var(AUDIT_DIR_ENV, None::<&str>, || {
            assert_eq!(config.audit_dir(), PathBuf::from("/from/config"));
        });
    }

    #[test]
    fn secrets_backend_prefers_environment() {
        let config = GatewayConfig {
            secrets_backend: Some("env".into()),
            ..GatewayConfig::default()
        };
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, None::<&str>, || {
            assert_eq!(config.secrets_backend(), SecretsBackend::Environment);
        });
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, Some("keychain"), || {
            assert_eq!(config.secrets_backend(), SecretsBackend::Keychain);
        });
    }
}
