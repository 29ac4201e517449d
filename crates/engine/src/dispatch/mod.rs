//! # Dispatch Pipeline
//!
//! One dispatch walks `resolving-config → building-payload → signing →
//! sending → recording → done`, dropping to `failed` from any stage:
//!
//! 1. look up provider, endpoint and mapping in the current catalog snapshot
//! 2. build the expression context from the model and the active environment
//! 3. resolve payload, headers and path
//! 4. apply the provider's auth strategy
//! 5. send with the endpoint's timeout and retry policy
//! 6. extract the normalized response from a 2xx answer
//! 7. persist a masked record and return the result
//!
//! Only an unknown or disabled configuration returns without a record; every
//! other failure is recorded and reported through [`DispatchResult`].

mod send;
mod trace;

use std::sync::Arc;

use chrono::Utc;
use conduit_api::{HttpTransport, OutboundRequest, TransportResponse, build_query_pairs};
use conduit_audit::{AuditStore, AuditStoreError};
use conduit_types::{
    DispatchResult, DispatchStage, ErrorKind, Outcome, RecordId, RecordedRequest, ReplayInputs, Subject, new_record_id,
};
use conduit_util::path_template::join_url;
use conduit_util::response::parse_body_lenient;
use conduit_util::{DEFAULT_MASK_TOKEN, Masker, SecretStore};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::{RequestDraft, ResolvedCredentials, apply_auth, injected_names};
use crate::catalog::{Catalog, CatalogStore, CompiledEndpoint, CompiledProvider};
use crate::expression::ExpressionContext;
use crate::mapping::ResolveError;

use self::send::{SendFailure, millis, send_with_retry};
use self::trace::DispatchTrace;

/// Failures that leave the caller without a [`DispatchResult`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no dispatch configuration for '{provider}/{endpoint}': {reason}")]
    ConfigNotFound {
        provider: String,
        endpoint: String,
        reason: String,
    },

    #[error("dispatch record could not be persisted: {0}")]
    Audit(#[from] AuditStoreError),
}

impl GatewayError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            GatewayError::ConfigNotFound { .. } => Some(ErrorKind::ConfigNotFound),
            GatewayError::Audit(_) => None,
        }
    }
}

/// Live caller input for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub provider: String,
    pub endpoint: String,
    pub model: Value,
    pub subject: Option<Subject>,
}

impl DispatchRequest {
    pub fn new(provider: impl Into<String>, endpoint: impl Into<String>, model: Value) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            model,
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }
}

/// Gateway-wide masking settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub mask_token: String,
    /// Field names masked for every provider, on top of the built-in list.
    pub sensitive_fields: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mask_token: DEFAULT_MASK_TOKEN.to_string(),
            sensitive_fields: Vec::new(),
        }
    }
}

/// Where a dispatch enters the pipeline.
#[derive(Debug, Clone)]
pub(crate) enum Entry {
    /// Full run from a caller model.
    Model(Value),
    /// Re-signing run from an archived payload, skipping mapping.
    Payload {
        payload: Value,
        path: Option<String>,
        headers: IndexMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub provider: String,
    pub endpoint: String,
    pub entry: Entry,
    pub subject: Option<Subject>,
    pub replay_of: Option<RecordId>,
}

/// Ties catalog, secrets, transport and audit store together.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Debug, Clone)]
pub struct DispatchPipeline {
    inner: Arc<PipelineInner>,
}

#[derive(Debug)]
struct PipelineInner {
    catalog: Arc<CatalogStore>,
    secrets: Arc<dyn SecretStore>,
    transport: Arc<dyn HttpTransport>,
    audit: Arc<dyn AuditStore>,
    options: PipelineOptions,
}

struct Built {
    payload: Option<Value>,
    path: String,
    headers: IndexMap<String, String>,
}

impl DispatchPipeline {
    pub fn new(
        catalog: Arc<CatalogStore>,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self::with_options(catalog, secrets, transport, audit, PipelineOptions::default())
    }

    pub fn with_options(
        catalog: Arc<CatalogStore>,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
        audit: Arc<dyn AuditStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                catalog,
                secrets,
                transport,
                audit,
                options,
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.inner.catalog
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.inner.audit
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, GatewayError> {
        self.dispatch_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`dispatch`](Self::dispatch), but aborts the HTTP call and any
    /// backoff sleep once `cancel` fires. The cancelled dispatch is still
    /// recorded.
    pub async fn dispatch_with_cancel(
        &self,
        request: DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<DispatchResult, GatewayError> {
        let invocation = Invocation {
            provider: request.provider,
            endpoint: request.endpoint,
            entry: Entry::Model(request.model),
            subject: request.subject,
            replay_of: None,
        };
        self.execute(invocation, cancel).await
    }

    /// Checks that `provider/endpoint` exists and may be dispatched right now.
    pub fn ensure_dispatchable(&self, provider: &str, endpoint: &str) -> Result<(), GatewayError> {
        resolve_config(&self.inner.catalog.snapshot(), provider, endpoint).map(|_| ())
    }

    pub(crate) async fn execute(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<DispatchResult, GatewayError> {
        let record_id = new_record_id();
        let span = info_span!(
            "dispatch",
            provider = %invocation.provider,
            endpoint = %invocation.endpoint,
            record_id = %record_id,
        );
        self.run(record_id, invocation, cancel).instrument(span).await
    }

    async fn run(
        &self,
        record_id: RecordId,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<DispatchResult, GatewayError> {
        let started = Instant::now();
        let created_at = Utc::now();
        debug!(stage = %DispatchStage::ResolvingConfig, "dispatch started");
        let snapshot = self.inner.catalog.snapshot();
        let (provider, endpoint) = resolve_config(&snapshot, &invocation.provider, &invocation.endpoint)?;

        let credentials = ResolvedCredentials::resolve(&provider.environment.credentials, self.inner.secrets.as_ref());
        let masker = self.masker(&provider, &credentials);
        let mut config = provider.config_value(&endpoint);
        config.insert("credentials".into(), credentials.as_json());
        let model = match &invocation.entry {
            Entry::Model(model) => model.clone(),
            Entry::Payload { .. } => Value::Null,
        };
        let context = ExpressionContext::new(model, Value::Object(config));

        let mut trace = DispatchTrace {
            id: record_id,
            provider: provider.slug.clone(),
            endpoint: endpoint.slug.clone(),
            environment: provider.environment_name.clone(),
            created_at,
            subject: invocation.subject,
            replay_of: invocation.replay_of,
            stage: DispatchStage::BuildingPayload,
            request: RecordedRequest {
                method: endpoint.method.clone(),
                url: provider.environment.base_url.clone(),
                ..RecordedRequest::default()
            },
            response: None,
            response_body: None,
            attempts: 0,
            error: None,
            inputs: ReplayInputs::default(),
        };
        debug!(stage = %trace.stage, "building payload");

        let built = match invocation.entry {
            Entry::Model(model) => {
                trace.inputs.model = Some(model);
                build(&endpoint, &context)
            }
            Entry::Payload { payload, path, headers } => {
                let path = match path {
                    Some(path) => Ok(path),
                    None => endpoint.path.render(&context),
                };
                path.map(|path| Built {
                    payload: Some(payload),
                    path,
                    headers,
                })
            }
        };
        let built = match built {
            Ok(built) => built,
            Err(error) => {
                let kind = match error {
                    ResolveError::Mapping(_) => ErrorKind::Mapping,
                    ResolveError::Expression { .. } => ErrorKind::ExpressionRuntime,
                };
                warn!(field = %error.field(), error = %error, "payload resolution failed");
                trace.fail(kind, error.to_string(), Some(error.field().to_string()));
                return self.finish(trace, &masker, started, None).await;
            }
        };
        trace.inputs.payload = built.payload.clone();
        trace.inputs.path = Some(built.path.clone());
        trace.inputs.headers = Some(built.headers.clone());

        let mut draft = RequestDraft {
            method: endpoint.method.clone(),
            url: join_url(&provider.environment.base_url, &built.path),
            headers: built.headers,
            ..RequestDraft::default()
        };
        if endpoint.sends_query() {
            draft.query = built.payload.as_ref().map(build_query_pairs).unwrap_or_default();
        } else {
            draft.body = built.payload.clone();
        }
        trace.request = recorded_request(&draft, built.payload.as_ref(), endpoint.sends_query());

        trace.stage = DispatchStage::Signing;
        debug!(stage = %trace.stage, auth = ?provider.auth, "signing request");
        let signed = match apply_auth(
            &provider.auth,
            draft,
            &credentials,
            endpoint.mapping.signature_formula.as_ref(),
            &context,
        ) {
            Ok(signed) => signed,
            Err(error) => {
                warn!(kind = %error.kind(), error = %error, "signing failed");
                trace.fail(ErrorKind::Auth, error.to_string(), error.credential().map(str::to_string));
                return self.finish(trace, &masker, started, None).await;
            }
        };
        trace.request = recorded_request(&signed, built.payload.as_ref(), endpoint.sends_query());

        trace.stage = DispatchStage::Sending;
        debug!(stage = %trace.stage, "sending request");
        let outbound = OutboundRequest {
            method: signed.method,
            url: signed.url,
            query: signed.query,
            headers: signed.headers,
            body: signed.body,
            timeout: Some(endpoint.timeout),
        };
        let sent = send_with_retry(
            self.inner.transport.as_ref(),
            &outbound,
            &endpoint.retry,
            endpoint.timeout,
            &cancel,
        )
        .await;
        trace.attempts = sent.attempts;

        let response = match sent.result {
            Ok(response) => response,
            Err(SendFailure::Transport(error)) => {
                trace.fail(ErrorKind::Transport, error.to_string(), None);
                return self.finish(trace, &masker, started, None).await;
            }
            Err(SendFailure::Cancelled) => {
                warn!(attempts = trace.attempts, "dispatch cancelled");
                trace.fail(ErrorKind::Cancelled, "dispatch cancelled before the vendor answered", None);
                return self.finish(trace, &masker, started, None).await;
            }
        };

        let body = parse_body_lenient(&response.body);
        let normalized = if response.is_success() {
            let response_context = context.with_response(response_value(&response, body.as_ref()));
            endpoint.mapping.extract_response(&response_context)
        } else {
            warn!(status = response.status, "vendor rejected request");
            trace.fail(ErrorKind::Vendor, format!("vendor responded with status {}", response.status), None);
            None
        };
        trace.response = Some(response);
        trace.response_body = body;
        self.finish(trace, &masker, started, normalized).await
    }

    fn masker(&self, provider: &CompiledProvider, credentials: &ResolvedCredentials) -> Masker {
        let mut masker = Masker::new(self.inner.options.mask_token.clone())
            .with_fields(&self.inner.options.sensitive_fields)
            .with_fields(&provider.sensitive_fields)
            .with_fields(injected_names(&provider.auth));
        for secret in credentials.values().values() {
            masker.add_secret(secret.clone());
        }
        masker
    }

    /// Persists the record and assembles the caller-visible result.
    async fn finish(
        &self,
        mut trace: DispatchTrace,
        masker: &Masker,
        started: Instant,
        normalized: Option<Value>,
    ) -> Result<DispatchResult, GatewayError> {
        let failed_at = trace.error.as_ref().map(|error| error.stage);
        trace.stage = DispatchStage::Recording;
        debug!(stage = %trace.stage, "recording dispatch");

        let latency_ms = millis(started.elapsed());
        let raw_body = trace.response_body.clone();
        let record = trace.into_record(masker, latency_ms);
        let result = DispatchResult {
            success: record.outcome == Outcome::Success,
            record_id: record.id,
            provider: record.provider.clone(),
            endpoint: record.endpoint.clone(),
            outcome: record.outcome,
            status: record.status,
            response: normalized,
            raw_body,
            error: record.error.clone(),
            attempts: record.attempts,
            latency_ms,
            replay_of: record.replay_of,
        };

        if let Err(error) = self.inner.audit.append(record).await {
            warn!(error = %error, "dispatch record could not be persisted");
            return Err(GatewayError::Audit(error));
        }

        let terminal = if failed_at.is_some() {
            DispatchStage::Failed
        } else {
            DispatchStage::Done
        };
        debug!(stage = %terminal, failed_at = ?failed_at, "dispatch finished");
        info!(
            outcome = %result.outcome,
            status = ?result.status,
            attempts = result.attempts,
            latency_ms,
            "dispatch recorded"
        );
        Ok(result)
    }
}

fn resolve_config(
    catalog: &Catalog,
    provider_slug: &str,
    endpoint_slug: &str,
) -> Result<(Arc<CompiledProvider>, Arc<CompiledEndpoint>), GatewayError> {
    let not_found = |reason: &str| GatewayError::ConfigNotFound {
        provider: provider_slug.to_string(),
        endpoint: endpoint_slug.to_string(),
        reason: reason.to_string(),
    };
    let provider = catalog.provider(provider_slug).ok_or_else(|| not_found("unknown provider"))?;
    let endpoint = provider.endpoint(endpoint_slug).ok_or_else(|| not_found("unknown endpoint"))?;
    if !provider.active || !endpoint.enabled {
        debug!(active = provider.active, enabled = endpoint.enabled, "configuration is disabled");
        return Err(not_found("disabled"));
    }
    Ok((Arc::clone(provider), Arc::clone(endpoint)))
}

fn build(endpoint: &CompiledEndpoint, context: &ExpressionContext) -> Result<Built, ResolveError> {
    let payload = endpoint.mapping.build_payload(context)?;
    let headers = endpoint.mapping.build_headers(context)?;
    let path = endpoint.path.render(context)?;
    Ok(Built { payload, path, headers })
}

/// Query-style requests record the payload as their body so the record shows
/// what was sent.
fn recorded_request(draft: &RequestDraft, payload: Option<&Value>, sends_query: bool) -> RecordedRequest {
    RecordedRequest {
        method: draft.method.clone(),
        url: draft.url.clone(),
        headers: draft.headers.clone(),
        body: if sends_query { payload.cloned() } else { draft.body.clone() },
    }
}

/// The `response.*` namespace: status, lower-cased headers and parsed body.
fn response_value(response: &TransportResponse, body: Option<&Value>) -> Value {
    let headers: Map<String, Value> = response
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), Value::String(value.clone())))
        .collect();
    json!({
        "status": response.status,
        "headers": headers,
        "body": body.cloned().unwrap_or(Value::Null),
    })
}
