//! Provider catalog documents.
//!
//! These are the plain structured documents produced by whatever authors the
//! catalog (an admin UI, a YAML file in a repo, ...). The engine validates and
//! compiles them into an immutable snapshot before any dispatch reads them.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Root catalog document holding every configured provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub providers: Vec<ProviderDocument>,
}

/// A named third-party integration target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDocument {
    /// Globally unique identifier referenced by endpoints and dispatch records.
    pub slug: String,
    /// Human readable display name.
    #[serde(default)]
    pub name: String,
    /// Deactivated providers cannot be dispatched or replayed.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Authentication strategy applied to every endpoint of this provider.
    #[serde(default)]
    pub auth: AuthStrategy,
    /// Per-environment variants keyed by environment name (e.g. `sandbox`, `production`).
    pub environments: IndexMap<String, EnvironmentDocument>,
    /// Name of the environment used for live dispatches.
    pub active_environment: String,
    /// Extra field names masked in dispatch records for this provider.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointDocument>,
}

/// Base URL, credentials and static settings for one provider environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDocument {
    pub base_url: String,
    /// Credential name to reference, e.g. `token: "${secret:stripe_live_token}"`.
    #[serde(default)]
    pub credentials: IndexMap<String, String>,
    /// Static values exposed under `config.*`.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// Closed set of authentication/signing strategies.
///
/// Credential-valued fields name an entry of the active environment's
/// `credentials` map rather than holding the secret itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthStrategy {
    #[default]
    None,
    BearerToken {
        token: String,
    },
    BasicAuth {
        username: String,
        password: String,
    },
    ApiKeyHeader {
        header: String,
        key: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    HmacSignature {
        header: String,
        secret: String,
        #[serde(default)]
        encoding: SignatureEncoding,
        #[serde(default)]
        prefix: Option<String>,
    },
    CustomFormula {
        target: SignatureTarget,
    },
}

impl AuthStrategy {
    /// Returns the discriminant of this strategy.
    pub fn kind(&self) -> AuthStrategyKind {
        match self {
            Self::None => AuthStrategyKind::None,
            Self::BearerToken { .. } => AuthStrategyKind::BearerToken,
            Self::BasicAuth { .. } => AuthStrategyKind::BasicAuth,
            Self::ApiKeyHeader { .. } => AuthStrategyKind::ApiKeyHeader,
            Self::HmacSignature { .. } => AuthStrategyKind::HmacSignature,
            Self::CustomFormula { .. } => AuthStrategyKind::CustomFormula,
        }
    }

    /// Credential names this strategy needs at signing time.
    pub fn credential_names(&self) -> Vec<&str> {
        match self {
            Self::None | Self::CustomFormula { .. } => Vec::new(),
            Self::BearerToken { token } => vec![token.as_str()],
            Self::BasicAuth { username, password } => vec![username.as_str(), password.as_str()],
            Self::ApiKeyHeader { key, .. } => vec![key.as_str()],
            Self::HmacSignature { secret, .. } => vec![secret.as_str()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStrategyKind {
    None,
    BearerToken,
    BasicAuth,
    ApiKeyHeader,
    HmacSignature,
    CustomFormula,
}

impl fmt::Display for AuthStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::BearerToken => "bearer-token",
            Self::BasicAuth => "basic-auth",
            Self::ApiKeyHeader => "api-key-header",
            Self::HmacSignature => "hmac-signature",
            Self::CustomFormula => "custom-formula",
        };
        f.write_str(label)
    }
}

/// Output encoding of an HMAC signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureEncoding {
    #[default]
    Hex,
    Base64,
}

/// Where a custom-formula signature is injected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureTarget {
    /// Header name, e.g. `{ "header": "X-Signature" }`.
    Header(String),
    /// Dot/bracket path inside the JSON body, e.g. `{ "body_path": "meta.sig" }`.
    BodyPath(String),
}

/// A specific operation under a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDocument {
    /// Unique within the owning provider.
    pub slug: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Relative path; `{name}` placeholders resolve from `model.name`, and
    /// `{model.a.b}` / `{config.x}` resolve as path expressions.
    pub path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mapping: MappingDocument,
}

impl EndpointDocument {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry policy for transport-level failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based) before the next one.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let delay_ms = (self.initial_backoff_ms as f64) * multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Transformation contract for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub headers: Vec<HeaderRule>,
    #[serde(default)]
    pub signature_formula: Option<String>,
    #[serde(default)]
    pub response: Vec<ExtractionRule>,
}

/// Largest explicit array index a target path may name (`items[1024]`).
pub const MAX_TARGET_INDEX: usize = 1024;

/// `target_path <- source_expression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub target_path: String,
    pub source_expression: String,
    #[serde(default)]
    pub required: bool,
}

impl FieldRule {
    pub fn new(target_path: impl Into<String>, source_expression: impl Into<String>) -> Self {
        Self {
            target_path: target_path.into(),
            source_expression: source_expression.into(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Request header with either a static value or an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Response normalization rule evaluated against `response.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub target_path: String,
    pub source_expression: String,
}
