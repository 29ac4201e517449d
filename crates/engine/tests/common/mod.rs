#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conduit_api::{HttpTransport, OutboundRequest, TransportError, TransportResponse};
use conduit_audit::{AuditStore, InMemoryAuditStore};
use conduit_engine::{Catalog, CatalogStore, DispatchPipeline, ReplayEngine};
use conduit_registry::parse_catalog_str;
use conduit_types::CatalogDocument;
use conduit_util::StaticSecretStore;

pub const PAYMENTS_TOKEN: &str = "tok_live_abcdef123456";
pub const ROTATED_TOKEN: &str = "tok_rotated_999999";

/// What the scripted vendor does for one call.
#[derive(Debug)]
pub enum Reply {
    Respond(TransportResponse),
    Fail(TransportError),
    /// Never answers; only a timeout or cancellation ends the call.
    Hang,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Reply::Respond(TransportResponse::new(status, body).with_header("Content-Type", "application/json"))
    }
}

/// Transport that replays a fixed script and records every request it sees.
/// Once the script runs out it answers `200 {}`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> OutboundRequest {
        self.requests().pop().expect("at least one request was sent")
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(TransportError::Request("hung call resumed".into()))
            }
            None => Ok(TransportResponse::new(200, "{}")),
        }
    }
}

pub fn catalog_document() -> CatalogDocument {
    parse_catalog_str(include_str!("../data/catalog.yaml")).expect("fixture catalog parses")
}

pub fn secrets() -> StaticSecretStore {
    StaticSecretStore::new()
        .with("payments_token", PAYMENTS_TOKEN)
        .with("acme_signing_secret", "k")
}

pub struct Harness {
    pub catalog: Arc<CatalogStore>,
    pub transport: Arc<ScriptedTransport>,
    pub audit: Arc<InMemoryAuditStore>,
    pub pipeline: DispatchPipeline,
}

impl Harness {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self::with_secrets(replies, secrets())
    }

    /// Every call answers `200 {}`.
    pub fn idle() -> Self {
        Self::new(Vec::<Reply>::new())
    }

    pub fn with_secrets(replies: impl IntoIterator<Item = Reply>, secrets: StaticSecretStore) -> Self {
        let catalog = Arc::new(CatalogStore::new(
            Catalog::compile(&catalog_document()).expect("fixture catalog compiles"),
        ));
        let transport = ScriptedTransport::new(replies);
        let audit = Arc::new(InMemoryAuditStore::new());
        let pipeline = DispatchPipeline::new(catalog.clone(), Arc::new(secrets), transport.clone(), audit.clone());
        Self {
            catalog,
            transport,
            audit,
            pipeline,
        }
    }

    /// A pipeline sharing this harness's catalog, transport and audit store
    /// but reading secrets from `secrets`.
    pub fn pipeline_with_secrets(&self, secrets: StaticSecretStore) -> DispatchPipeline {
        DispatchPipeline::new(
            self.catalog.clone(),
            Arc::new(secrets),
            self.transport.clone(),
            self.audit.clone() as Arc<dyn AuditStore>,
        )
    }

    pub fn replay_engine(&self) -> ReplayEngine {
        ReplayEngine::new(self.pipeline.clone())
    }
}
