//! # Conduit Engine
//!
//! Turns a vendor-agnostic model into a signed vendor request, sends it and
//! keeps an auditable, replayable record of what happened.
//!
//! ## Modules
//!
//! - **`expression`**: the expression language used by every mapping rule
//! - **`mapping`**: payload, header, path and response resolution
//! - **`auth`**: the closed set of authentication and signing strategies
//! - **`catalog`**: validated, compiled provider snapshots
//! - **`dispatch`**: the pipeline tying mapping, signing, HTTP and audit together
//! - **`replay`**: re-execution of archived dispatches
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use conduit_api::ReqwestTransport;
//! use conduit_audit::InMemoryAuditStore;
//! use conduit_engine::{Catalog, CatalogStore, DispatchPipeline, DispatchRequest};
//! use conduit_registry::parse_catalog_str;
//! use conduit_util::StaticSecretStore;
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let document = parse_catalog_str(&std::fs::read_to_string("catalog.yaml")?)?;
//! let pipeline = DispatchPipeline::new(
//!     Arc::new(CatalogStore::new(Catalog::compile(&document)?)),
//!     Arc::new(StaticSecretStore::new().with("stripe_sandbox_token", "sk_test_123")),
//!     Arc::new(ReqwestTransport::new()?),
//!     Arc::new(InMemoryAuditStore::new()),
//! );
//! let result = pipeline
//!     .dispatch(DispatchRequest::new("stripe", "charge", json!({"amount": 2.5})))
//!     .await?;
//! println!("{} {:?}", result.outcome, result.status);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod catalog;
pub mod dispatch;
pub mod expression;
pub mod mapping;
pub mod replay;

pub use auth::{AuthError, AuthErrorKind, RequestDraft, ResolvedCredentials, apply_auth};
pub use catalog::{Catalog, CatalogError, CatalogStore, CompiledEndpoint, CompiledProvider};
pub use dispatch::{DispatchPipeline, DispatchRequest, GatewayError, PipelineOptions};
pub use expression::{
    Expression, ExpressionContext, ExpressionError, ExpressionRuntimeError, ExpressionSyntaxError, evaluate,
};
pub use mapping::{CompiledMapping, MappingError, ResolveError, TargetPath};
pub use replay::{ReplayEngine, ReplayError};
