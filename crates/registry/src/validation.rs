//! Structural validation of catalog documents.
//!
//! Expression syntax and function arity are checked later, when the engine
//! compiles the catalog; everything that can be judged from the document
//! shape alone is checked here.

use std::collections::HashSet;

use conduit_api::{BaseUrlError, validate_base_url};
use conduit_types::{
    AuthStrategy, CatalogDocument, EndpointDocument, MAX_TARGET_INDEX, MappingDocument, ProviderDocument,
    SignatureTarget,
};
use conduit_util::path_template::{PathTemplateError, placeholders};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

static SLUG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("slug regex should compile"));
static INDEX_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\s*(\d+)\s*\]").expect("index regex should compile"));

/// Validate an entire catalog document, stopping at the first problem.
pub fn validate_catalog(catalog: &CatalogDocument) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for provider in &catalog.providers {
        validate_slug("provider", &provider.slug)?;
        if !seen.insert(provider.slug.as_str()) {
            return Err(ValidationError::DuplicateSlug {
                kind: "provider",
                slug: provider.slug.clone(),
            });
        }
        validate_provider(provider)?;
        debug!(provider = %provider.slug, "validated provider document");
    }
    Ok(())
}

/// Validate a slug used for providers and endpoints.
pub fn validate_slug(kind: &'static str, slug: &str) -> Result<(), ValidationError> {
    if !SLUG_REGEX.is_match(slug) {
        return Err(ValidationError::InvalidSlug {
            kind,
            slug: slug.to_string(),
            reason: "must start with a lowercase letter or digit and contain only lowercase letters, digits, '_' and '-'"
                .to_string(),
        });
    }
    Ok(())
}

/// Validate a single provider document.
pub fn validate_provider(provider: &ProviderDocument) -> Result<(), ValidationError> {
    let slug = provider.slug.as_str();
    if provider.environments.is_empty() {
        return Err(invalid(slug, "at least one environment is required"));
    }
    let Some(active) = provider.environments.get(&provider.active_environment) else {
        return Err(ValidationError::UnknownEnvironment {
            provider: slug.to_string(),
            environment: provider.active_environment.clone(),
        });
    };

    for (name, environment) in &provider.environments {
        validate_base_url(&environment.base_url).map_err(|source| ValidationError::InvalidBaseUrl {
            provider: slug.to_string(),
            environment: name.clone(),
            source,
        })?;
    }

    for credential in provider.auth.credential_names() {
        if !active.credentials.contains_key(credential) {
            return Err(ValidationError::MissingCredential {
                provider: slug.to_string(),
                environment: provider.active_environment.clone(),
                credential: credential.to_string(),
            });
        }
    }
    validate_auth(slug, &provider.auth)?;

    if provider.sensitive_fields.iter().any(|field| field.trim().is_empty()) {
        return Err(invalid(slug, "sensitive field names must not be empty"));
    }

    let mut endpoints = HashSet::new();
    for endpoint in &provider.endpoints {
        validate_slug("endpoint", &endpoint.slug)?;
        if !endpoints.insert(endpoint.slug.as_str()) {
            return Err(ValidationError::DuplicateSlug {
                kind: "endpoint",
                slug: format!("{slug}/{}", endpoint.slug),
            });
        }
        validate_endpoint(provider, endpoint)?;
    }
    Ok(())
}

fn validate_auth(provider: &str, auth: &AuthStrategy) -> Result<(), ValidationError> {
    match auth {
        AuthStrategy::ApiKeyHeader { header, .. } | AuthStrategy::HmacSignature { header, .. } => {
            validate_header_name(provider, header)
        }
        AuthStrategy::CustomFormula {
            target: SignatureTarget::Header(header),
        } => validate_header_name(provider, header),
        AuthStrategy::CustomFormula {
            target: SignatureTarget::BodyPath(path),
        } if path.trim().is_empty() => Err(invalid(provider, "custom formula body path must not be empty")),
        AuthStrategy::CustomFormula {
            target: SignatureTarget::BodyPath(path),
        } => validate_target_indices(provider, path),
        _ => Ok(()),
    }
}

fn validate_endpoint(provider: &ProviderDocument, endpoint: &EndpointDocument) -> Result<(), ValidationError> {
    let location = format!("{}/{}", provider.slug, endpoint.slug);
    let method = endpoint.method.to_ascii_uppercase();
    if !SUPPORTED_METHODS.contains(&method.as_str()) {
        return Err(invalid(&location, &format!("unsupported HTTP method '{}'", endpoint.method)));
    }
    if !endpoint.path.is_empty() && !endpoint.path.starts_with('/') {
        return Err(invalid(&location, "path must start with '/'"));
    }
    placeholders(&endpoint.path).map_err(|source| ValidationError::InvalidPath {
        location: location.clone(),
        source,
    })?;
    if endpoint.timeout_ms == 0 {
        return Err(invalid(&location, "timeout_ms must be greater than zero"));
    }
    if !endpoint.retry.multiplier.is_finite() || endpoint.retry.multiplier < 1.0 {
        return Err(invalid(&location, "retry multiplier must be a finite number >= 1.0"));
    }
    if matches!(provider.auth, AuthStrategy::CustomFormula { .. })
        && endpoint.enabled
        && endpoint
            .mapping
            .signature_formula
            .as_deref()
            .is_none_or(|formula| formula.trim().is_empty())
    {
        return Err(invalid(&location, "custom-formula auth requires a signature_formula"));
    }
    validate_mapping(&location, &endpoint.mapping)
}

fn validate_mapping(location: &str, mapping: &MappingDocument) -> Result<(), ValidationError> {
    let mut targets = HashSet::new();
    for rule in &mapping.fields {
        if rule.target_path.trim().is_empty() {
            return Err(invalid(location, "field rule target_path must not be empty"));
        }
        validate_target_indices(location, &rule.target_path)?;
        // Append paths (`tags[]`) add a fresh element on every write.
        let appends = rule.target_path.contains("[]");
        if !appends && !targets.insert(rule.target_path.trim()) {
            return Err(ValidationError::DuplicateTarget {
                location: location.to_string(),
                target: rule.target_path.clone(),
            });
        }
    }

    let mut headers = HashSet::new();
    for rule in &mapping.headers {
        validate_header_name(location, &rule.name)?;
        if !headers.insert(rule.name.to_ascii_lowercase()) {
            return Err(ValidationError::DuplicateTarget {
                location: location.to_string(),
                target: format!("header {}", rule.name),
            });
        }
        if rule.value.is_some() == rule.expression.is_some() {
            return Err(invalid(
                location,
                &format!("header '{}' needs exactly one of value or expression", rule.name),
            ));
        }
    }

    let mut extracted = HashSet::new();
    for rule in &mapping.response {
        validate_target_indices(location, &rule.target_path)?;
        if !extracted.insert(rule.target_path.trim()) {
            return Err(ValidationError::DuplicateTarget {
                location: location.to_string(),
                target: format!("response {}", rule.target_path),
            });
        }
    }
    Ok(())
}

/// Explicit indices above [`MAX_TARGET_INDEX`] would make writes pad huge arrays.
fn validate_target_indices(location: &str, target: &str) -> Result<(), ValidationError> {
    for captures in INDEX_REGEX.captures_iter(target) {
        let index = &captures[1];
        if !index.parse::<usize>().is_ok_and(|index| index <= MAX_TARGET_INDEX) {
            return Err(invalid(
                location,
                &format!("index {index} in target '{target}' exceeds {MAX_TARGET_INDEX}"),
            ));
        }
    }
    Ok(())
}

/// Validate an HTTP header name against the RFC 7230 token alphabet.
fn validate_header_name(location: &str, name: &str) -> Result<(), ValidationError> {
    let is_token_char = |ch: char| ch.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(ch);
    if name.is_empty() || !name.chars().all(is_token_char) {
        return Err(ValidationError::InvalidHeaderName {
            location: location.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn invalid(location: &str, reason: &str) -> ValidationError {
    ValidationError::Invalid {
        location: location.to_string(),
        reason: reason.to_string(),
    }
}

/// Errors that can occur during validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid {kind} slug '{slug}': {reason}")]
    InvalidSlug {
        kind: &'static str,
        slug: String,
        reason: String,
    },

    #[error("Duplicate {kind} slug '{slug}'")]
    DuplicateSlug { kind: &'static str, slug: String },

    #[error("Provider '{provider}' has no environment named '{environment}'")]
    UnknownEnvironment { provider: String, environment: String },

    #[error("Provider '{provider}' environment '{environment}': {source}")]
    InvalidBaseUrl {
        provider: String,
        environment: String,
        #[source]
        source: BaseUrlError,
    },

    #[error("Provider '{provider}' environment '{environment}' does not declare credential '{credential}'")]
    MissingCredential {
        provider: String,
        environment: String,
        credential: String,
    },

    #[error("Invalid path in '{location}': {source}")]
    InvalidPath {
        location: String,
        #[source]
        source: PathTemplateError,
    },

    #[error("Duplicate target '{target}' in '{location}'")]
    DuplicateTarget { location: String, target: String },

    #[error("Invalid header name '{name}' in '{location}'")]
    InvalidHeaderName { location: String, name: String },

    #[error("Invalid configuration in '{location}': {reason}")]
    Invalid { location: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_io::parse_catalog_str;

    fn catalog(yaml: &str) -> CatalogDocument {
        parse_catalog_str(yaml).expect("catalog parses")
    }

    const VALID: &str = r#"
providers:
  - slug: stripe
    auth: { kind: bearer_token, token: api_token }
    environments:
      sandbox:
        base_url: https://api.stripe.test
        credentials: { api_token: "${secret:stripe_sandbox}" }
    active_environment: sandbox
    endpoints:
      - slug: charge
        path: /v1/customers/{customer_id}/charges
        mapping:
          fields:
            - { target_path: amount, source_expression: "model.amount * 100", required: true }
          headers:
            - { name: Idempotency-Key, expression: "model.order_id" }
"#;

    #[test]
    fn valid_catalog_passes() {
        validate_catalog(&catalog(VALID)).unwrap();
    }

    #[test]
    fn duplicate_provider_slugs_are_rejected() {
        let mut document = catalog(VALID);
        document.providers.push(document.providers[0].clone());
        assert!(matches!(
            validate_catalog(&document),
            Err(ValidationError::DuplicateSlug { kind: "provider", .. })
        ));
    }

    #[test]
    fn duplicate_target_paths_are_rejected() {
        let mut document = catalog(VALID);
        let fields = &mut document.providers[0].endpoints[0].mapping.fields;
        fields.push(fields[0].clone());
        assert!(matches!(
            validate_catalog(&document),
            Err(ValidationError::DuplicateTarget { target, .. }) if target == "amount"
        ));
    }

    #[test]
    fn repeated_append_targets_are_allowed() {
        let mut document = catalog(VALID);
        let fields = &mut document.providers[0].endpoints[0].mapping.fields;
        fields[0].target_path = "tags[]".into();
        fields.push(fields[0].clone());
        validate_catalog(&document).unwrap();
    }

    #[test]
    fn oversized_target_indices_are_rejected() {
        let mut document = catalog(VALID);
        document.providers[0].endpoints[0].mapping.fields[0].target_path = "data[4000000000]".into();
        assert!(matches!(
            validate_catalog(&document),
            Err(ValidationError::Invalid { reason, .. }) if reason.contains("4000000000")
        ));

        document.providers[0].endpoints[0].mapping.fields[0].target_path = format!("data[{MAX_TARGET_INDEX}]");
        validate_catalog(&document).unwrap();
    }

    #[test]
    fn active_environment_must_exist() {
        let mut document = catalog(VALID);
        document.providers[0].active_environment = "production".into();
        assert!(matches!(
            validate_catalog(&document),
            Err(ValidationError::UnknownEnvironment { .. })
        ));
    }

    #[test]
    fn auth_credentials_must_be_declared() {
        let mut document = catalog(VALID);
        document.providers[0].environments[0].credentials.clear();
        assert!(matches!(
            validate_catalog(&document),
            Err(ValidationError::MissingCredential { credential, .. }) if credential == "api_token"
        ));
    }

    #[test]
    fn insecure_base_url_is_rejected() {
        let mut document = catalog(VALID);
        document.providers[0].environments[0].base_url = "http://api.stripe.test".into();
        assert!(matches!(
            validate_catalog(&document),
            Err(ValidationError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn header_rules_need_exactly_one_source() {
        let mut document = catalog(VALID);
        document.providers[0].endpoints[0].mapping.headers[0].value = Some("static".into());
        assert!(matches!(validate_catalog(&document), Err(ValidationError::Invalid { .. })));
    }

    #[test]
    fn bad_slugs_and_methods_are_rejected() {
        let mut document = catalog(VALID);
        document.providers[0].endpoints[0].slug = "Charge Now".into();
        assert!(matches!(validate_catalog(&document), Err(ValidationError::InvalidSlug { .. })));

        let mut document = catalog(VALID);
        document.providers[0].endpoints[0].method = "FETCH".into();
        assert!(matches!(validate_catalog(&document), Err(ValidationError::Invalid { .. })));
    }

    #[test]
    fn custom_formula_requires_signature_formula() {
        let mut document = catalog(VALID);
        document.providers[0].auth = AuthStrategy::CustomFormula {
            target: SignatureTarget::Header("X-Signature".into()),
        };
        assert!(matches!(validate_catalog(&document), Err(ValidationError::Invalid { .. })));
        document.providers[0].endpoints[0].mapping.signature_formula = Some("sha256(model.order_id)".into());
        validate_catalog(&document).unwrap();
    }
}
