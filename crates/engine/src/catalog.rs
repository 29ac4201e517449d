//! Compiled, immutable catalog snapshots.
//!
//! [`Catalog::compile`] validates a [`CatalogDocument`] structurally, parses
//! every expression once and resolves each provider's active environment.
//! [`CatalogStore`] publishes the result as an `Arc<Catalog>`; a dispatch reads
//! one snapshot at the start and keeps it even if the catalog is replaced
//! while the call is in flight.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use conduit_registry::{ValidationError, validate_catalog};
use conduit_types::{AuthStrategy, CatalogDocument, EndpointDocument, EnvironmentDocument, ProviderDocument, RetryPolicy};
use conduit_util::path_template::PathTemplateError;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::expression::ExpressionSyntaxError;
use crate::mapping::{CompiledMapping, PathTemplate};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{location}: {source}")]
    Expression {
        location: String,
        #[source]
        source: ExpressionSyntaxError,
    },

    #[error("{location}: the response namespace is only available in response extraction rules")]
    ResponseOutsideExtraction { location: String },

    #[error("{location}: invalid target path '{target}': {reason}")]
    TargetPath {
        location: String,
        target: String,
        reason: String,
    },

    #[error("{location}: {source}")]
    Path {
        location: String,
        #[source]
        source: PathTemplateError,
    },

    #[error("{location}: {reason}")]
    Invalid { location: String, reason: String },
}

/// One endpoint with its mapping compiled.
#[derive(Debug, Clone)]
pub struct CompiledEndpoint {
    pub slug: String,
    /// Upper-cased HTTP method.
    pub method: String,
    pub path: PathTemplate,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub enabled: bool,
    pub mapping: CompiledMapping,
}

impl CompiledEndpoint {
    /// GET and DELETE send the payload as query parameters instead of a body.
    pub fn sends_query(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "DELETE" | "HEAD")
    }
}

/// One provider resolved against its active environment.
#[derive(Debug, Clone)]
pub struct CompiledProvider {
    pub slug: String,
    pub name: String,
    pub active: bool,
    pub auth: AuthStrategy,
    pub environment_name: String,
    pub environment: EnvironmentDocument,
    pub sensitive_fields: Vec<String>,
    endpoints: IndexMap<String, Arc<CompiledEndpoint>>,
}

impl CompiledProvider {
    pub fn endpoint(&self, slug: &str) -> Option<&Arc<CompiledEndpoint>> {
        self.endpoints.get(slug)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<CompiledEndpoint>> {
        self.endpoints.values()
    }

    /// Static part of the `config.*` namespace; credentials are added per dispatch.
    pub fn config_value(&self, endpoint: &CompiledEndpoint) -> Map<String, Value> {
        let mut config = Map::new();
        for (key, value) in &self.environment.settings {
            config.insert(key.clone(), value.clone());
        }
        config.insert("provider".into(), Value::String(self.slug.clone()));
        config.insert("endpoint".into(), Value::String(endpoint.slug.clone()));
        config.insert("environment".into(), Value::String(self.environment_name.clone()));
        config.insert("base_url".into(), Value::String(self.environment.base_url.clone()));
        config.insert("method".into(), Value::String(endpoint.method.clone()));
        config.insert("path".into(), Value::String(endpoint.path.template().to_string()));
        config
    }
}

/// Validated and compiled provider catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    providers: IndexMap<String, Arc<CompiledProvider>>,
}

impl Catalog {
    pub fn compile(document: &CatalogDocument) -> Result<Self, CatalogError> {
        validate_catalog(document)?;
        let mut providers = IndexMap::with_capacity(document.providers.len());
        for provider in &document.providers {
            let compiled = compile_provider(provider)?;
            providers.insert(provider.slug.clone(), Arc::new(compiled));
        }
        info!(providers = providers.len(), "compiled provider catalog");
        Ok(Self { providers })
    }

    pub fn provider(&self, slug: &str) -> Option<&Arc<CompiledProvider>> {
        self.providers.get(slug)
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<CompiledProvider>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn compile_provider(document: &ProviderDocument) -> Result<CompiledProvider, CatalogError> {
    let environment = document
        .environments
        .get(&document.active_environment)
        .cloned()
        .ok_or_else(|| {
            CatalogError::Validation(ValidationError::UnknownEnvironment {
                provider: document.slug.clone(),
                environment: document.active_environment.clone(),
            })
        })?;
    let mut endpoints = IndexMap::with_capacity(document.endpoints.len());
    for endpoint in &document.endpoints {
        let compiled = compile_endpoint(&document.slug, endpoint)?;
        endpoints.insert(endpoint.slug.clone(), Arc::new(compiled));
    }
    Ok(CompiledProvider {
        slug: document.slug.clone(),
        name: document.name.clone(),
        active: document.active,
        auth: document.auth.clone(),
        environment_name: document.active_environment.clone(),
        environment,
        sensitive_fields: document.sensitive_fields.clone(),
        endpoints,
    })
}

fn compile_endpoint(provider: &str, document: &EndpointDocument) -> Result<CompiledEndpoint, CatalogError> {
    let location = format!("{provider}/{}", document.slug);
    Ok(CompiledEndpoint {
        slug: document.slug.clone(),
        method: document.method.to_ascii_uppercase(),
        path: PathTemplate::compile(&document.path, &location)?,
        timeout: document.timeout(),
        retry: document.retry.clone(),
        enabled: document.enabled,
        mapping: CompiledMapping::compile(&document.mapping, &location)?,
    })
}

/// Holder of the current catalog snapshot.
#[derive(Debug, Default)]
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The snapshot every subsequent read observes until the next [`replace`](Self::replace).
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Publishes a new snapshot; in-flight dispatches keep the one they read.
    pub fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
        let next = Arc::new(catalog);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, next)
    }

    /// Compiles `document` and publishes it when it is valid.
    pub fn reload(&self, document: &CatalogDocument) -> Result<(), CatalogError> {
        let catalog = Catalog::compile(document)?;
        self.replace(catalog);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_registry::parse_catalog_str;

    const CATALOG: &str = r#"
providers:
  - slug: stripe
    name: Stripe
    auth: { kind: bearer_token, token: api_token }
    environments:
      sandbox:
        base_url: https://api.stripe.test
        credentials: { api_token: stripe_sandbox_token }
        settings: { account: acct_1 }
      production:
        base_url: https://api.stripe.com
        credentials: { api_token: stripe_live_token }
    active_environment: sandbox
    endpoints:
      - slug: charge
        method: post
        path: /v1/charges
        mapping:
          fields:
            - { target_path: amount, source_expression: "model.amount * 100", required: true }
      - slug: refunds
        method: get
        path: /v1/refunds/{refund_id}
"#;

    fn document() -> CatalogDocument {
        parse_catalog_str(CATALOG).unwrap()
    }

    #[test]
    fn compiles_active_environment_and_endpoints() {
        let catalog = Catalog::compile(&document()).unwrap();
        let stripe = catalog.provider("stripe").unwrap();
        assert_eq!(stripe.environment_name, "sandbox");
        assert_eq!(stripe.environment.base_url, "https://api.stripe.test");
        let charge = stripe.endpoint("charge").unwrap();
        assert_eq!(charge.method, "POST");
        assert!(!charge.sends_query());
        assert!(stripe.endpoint("refunds").unwrap().sends_query());
        assert_eq!(charge.mapping.fields.len(), 1);

        let config = stripe.config_value(charge);
        assert_eq!(config["account"], "acct_1");
        assert_eq!(config["environment"], "sandbox");
        assert_eq!(config["path"], "/v1/charges");
    }

    #[test]
    fn expression_syntax_errors_fail_compilation() {
        let mut document = document();
        document.providers[0].endpoints[0].mapping.fields[0].source_expression = "model.amount *".into();
        let error = Catalog::compile(&document).unwrap_err();
        assert!(matches!(error, CatalogError::Expression { ref location, .. } if location.contains("stripe/charge")));
    }

    #[test]
    fn unknown_function_and_arity_fail_compilation() {
        let mut document = document();
        document.providers[0].endpoints[0].mapping.fields[0].source_expression = "now()".into();
        assert!(matches!(Catalog::compile(&document), Err(CatalogError::Expression { .. })));

        document.providers[0].endpoints[0].mapping.fields[0].source_expression = "round()".into();
        assert!(matches!(Catalog::compile(&document), Err(CatalogError::Expression { .. })));
    }

    #[test]
    fn structural_errors_surface_as_invalid() {
        let mut document = document();
        document.providers.push(document.providers[0].clone());
        assert!(matches!(Catalog::compile(&document), Err(CatalogError::Validation(_))));
    }

    #[test]
    fn snapshots_survive_replacement() {
        let store = CatalogStore::new(Catalog::compile(&document()).unwrap());
        let before = store.snapshot();
        store.replace(Catalog::default());
        assert!(before.provider("stripe").is_some());
        assert!(store.snapshot().is_empty());

        store.reload(&document()).unwrap();
        assert_eq!(store.snapshot().len(), 1);

        let mut broken = document();
        broken.providers[0].active_environment = "missing".into();
        assert!(store.reload(&broken).is_err());
        assert_eq!(store.snapshot().len(), 1);
    }
}
