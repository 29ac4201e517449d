//! # Auth Strategy Resolver
//!
//! Applies one provider authentication strategy to a request draft. Credential
//! values come from [`ResolvedCredentials`], which the pipeline fills from the
//! active environment before mapping runs. Secrets only ever reach logs as
//! `ab****yz` via [`mask_for_diagnostics`].

use std::fmt;

use conduit_types::{AuthStrategy, SignatureEncoding, SignatureTarget};
use conduit_util::crypto::{base64_encode, hmac_sha256_base64, hmac_sha256_hex};
use conduit_util::{SecretError, SecretStore, canonical_body, mask_for_diagnostics, render_plain, resolve_reference};
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::expression::{Expression, ExpressionContext};
use crate::mapping::TargetPath;

/// Outgoing request before it is handed to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDraft {
    pub method: String,
    /// Absolute URL without query string.
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: IndexMap<String, String>,
    pub body: Option<Value>,
}

impl RequestDraft {
    /// Inserts a header, replacing any existing header with the same
    /// case-insensitive name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    SecretMissing,
    FormulaError,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthErrorKind::SecretMissing => "secret-missing",
            AuthErrorKind::FormulaError => "formula-error",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("secret-missing: credential '{credential}' could not be resolved: {reason}")]
    SecretMissing { credential: String, reason: String },

    #[error("formula-error: {message}")]
    FormulaError { message: String },
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::SecretMissing { .. } => AuthErrorKind::SecretMissing,
            AuthError::FormulaError { .. } => AuthErrorKind::FormulaError,
        }
    }

    pub fn credential(&self) -> Option<&str> {
        match self {
            AuthError::SecretMissing { credential, .. } => Some(credential),
            AuthError::FormulaError { .. } => None,
        }
    }
}

/// Credential values for one dispatch, keyed by credential name.
///
/// Resolution is lenient: names that fail to resolve are remembered so that
/// signing can report which credential was missing.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCredentials {
    values: IndexMap<String, String>,
    missing: IndexMap<String, SecretError>,
}

impl ResolvedCredentials {
    /// Resolves every reference in `references` against `store`.
    pub fn resolve(references: &IndexMap<String, String>, store: &dyn SecretStore) -> Self {
        let mut credentials = Self::default();
        for (name, reference) in references {
            match resolve_reference(store, reference) {
                Ok(value) => {
                    debug!(credential = %name, value = %mask_for_diagnostics(&value), "resolved credential");
                    credentials.values.insert(name.clone(), value);
                }
                Err(error) => {
                    debug!(credential = %name, error = %error, "credential unresolved");
                    credentials.missing.insert(name.clone(), error);
                }
            }
        }
        credentials
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.missing.shift_remove(&name);
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Result<&str, AuthError> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.as_str());
        }
        let reason = self
            .missing
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_else(|| "not declared in the active environment".to_string());
        Err(AuthError::SecretMissing {
            credential: name.to_string(),
            reason,
        })
    }

    /// Resolved values, used for `config.credentials` and for masking.
    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }

    pub fn as_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect(),
        )
    }
}

/// Header names (and body fields) that carry credential-derived values for
/// this strategy. They are always masked in records.
pub fn injected_names(strategy: &AuthStrategy) -> Vec<String> {
    match strategy {
        AuthStrategy::None => Vec::new(),
        AuthStrategy::BearerToken { .. } | AuthStrategy::BasicAuth { .. } => vec!["Authorization".to_string()],
        AuthStrategy::ApiKeyHeader { header, .. } | AuthStrategy::HmacSignature { header, .. } => vec![header.clone()],
        AuthStrategy::CustomFormula {
            target: SignatureTarget::Header(header),
        } => vec![header.clone()],
        AuthStrategy::CustomFormula {
            target: SignatureTarget::BodyPath(path),
        } => TargetPath::parse(path)
            .ok()
            .and_then(|path| {
                path.segments().iter().rev().find_map(|segment| match segment {
                    crate::mapping::PathSegment::Key(key) => Some(key.clone()),
                    _ => None,
                })
            })
            .into_iter()
            .collect(),
    }
}

/// Applies `strategy` to `draft`.
///
/// Auth headers replace mapped headers with the same name. `formula` is the
/// mapping's signature formula, evaluated only for custom-formula providers.
pub fn apply_auth(
    strategy: &AuthStrategy,
    mut draft: RequestDraft,
    credentials: &ResolvedCredentials,
    formula: Option<&Expression>,
    context: &ExpressionContext,
) -> Result<RequestDraft, AuthError> {
    match strategy {
        AuthStrategy::None => {}
        AuthStrategy::BearerToken { token } => {
            let token = credentials.get(token)?;
            debug!(token = %mask_for_diagnostics(token), "applying bearer token");
            draft.set_header("Authorization", format!("Bearer {token}"));
        }
        AuthStrategy::BasicAuth { username, password } => {
            let username = credentials.get(username)?;
            let password = credentials.get(password)?;
            debug!(username = %mask_for_diagnostics(username), "applying basic auth");
            draft.set_header("Authorization", format!("Basic {}", base64_encode(&format!("{username}:{password}"))));
        }
        AuthStrategy::ApiKeyHeader { header, key, prefix } => {
            let key = credentials.get(key)?;
            debug!(header = %header, key = %mask_for_diagnostics(key), "applying api key header");
            draft.set_header(header, with_prefix(prefix.as_deref(), key));
        }
        AuthStrategy::HmacSignature {
            header,
            secret,
            encoding,
            prefix,
        } => {
            let secret = credentials.get(secret)?;
            let canonical = canonical_body(draft.body.as_ref());
            let signature = match encoding {
                SignatureEncoding::Hex => hmac_sha256_hex(&canonical, secret),
                SignatureEncoding::Base64 => hmac_sha256_base64(&canonical, secret),
            };
            debug!(
                header = %header,
                secret = %mask_for_diagnostics(secret),
                canonical_len = canonical.len(),
                "applying hmac signature"
            );
            draft.set_header(header, with_prefix(prefix.as_deref(), &signature));
        }
        AuthStrategy::CustomFormula { target } => {
            let Some(formula) = formula else {
                return Err(AuthError::FormulaError {
                    message: "endpoint mapping has no signature_formula".to_string(),
                });
            };
            let signature = formula.evaluate(context).map_err(|error| AuthError::FormulaError {
                message: format!("'{formula}' failed: {error}"),
            })?;
            if signature.is_null() {
                return Err(AuthError::FormulaError {
                    message: format!("'{formula}' evaluated to null"),
                });
            }
            match target {
                SignatureTarget::Header(header) => {
                    debug!(header = %header, "applying custom formula signature");
                    draft.set_header(header, render_plain(&signature));
                }
                SignatureTarget::BodyPath(path) => {
                    let path = TargetPath::parse(path).map_err(|message| AuthError::FormulaError { message })?;
                    debug!(body_path = %path, "applying custom formula signature");
                    let body = draft.body.get_or_insert_with(|| Value::Object(Default::default()));
                    path.write(body, signature).map_err(|error| AuthError::FormulaError {
                        message: error.to_string(),
                    })?;
                }
            }
        }
    }
    Ok(draft)
}

fn with_prefix(prefix: Option<&str>, value: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}{value}"),
        _ => value.to_string(),
    }
}
