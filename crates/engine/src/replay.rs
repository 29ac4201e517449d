//! # Replay Engine
//!
//! Re-executes an archived dispatch. The original record is never changed;
//! the replay is a new record with `replay_of` set, and the original gains a
//! lineage back-reference.
//!
//! The replay basis stored on the record decides where the pipeline is
//! re-entered: a retained model runs the whole pipeline again, a retained
//! payload skips mapping and is re-signed with the secrets that are current
//! now.

use conduit_audit::AuditStoreError;
use conduit_types::{DispatchResult, RecordId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatch::{DispatchPipeline, Entry, GatewayError, Invocation};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("dispatch record {id} not found")]
    RecordNotFound { id: RecordId },

    #[error("'{provider}/{endpoint}' can no longer be dispatched: {reason}")]
    ProviderDeactivated {
        provider: String,
        endpoint: String,
        reason: String,
    },

    #[error("dispatch record {id} kept no replayable inputs")]
    InputsUnavailable { id: RecordId },

    #[error(transparent)]
    Audit(AuditStoreError),
}

impl ReplayError {
    /// Stable reason code reported to callers.
    pub fn reason(&self) -> &'static str {
        match self {
            ReplayError::RecordNotFound { .. } => "record-not-found",
            ReplayError::ProviderDeactivated { .. } => "provider-deactivated",
            ReplayError::InputsUnavailable { .. } => "inputs-unavailable",
            ReplayError::Audit(_) => "audit",
        }
    }
}

impl From<GatewayError> for ReplayError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::ConfigNotFound {
                provider,
                endpoint,
                reason,
            } => ReplayError::ProviderDeactivated {
                provider,
                endpoint,
                reason,
            },
            GatewayError::Audit(error) => ReplayError::Audit(error),
        }
    }
}

/// Replays records through a [`DispatchPipeline`] and its audit store.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    pipeline: DispatchPipeline,
}

impl ReplayEngine {
    pub fn new(pipeline: DispatchPipeline) -> Self {
        Self { pipeline }
    }

    pub async fn replay(&self, id: RecordId) -> Result<DispatchResult, ReplayError> {
        self.replay_with_cancel(id, CancellationToken::new()).await
    }

    pub async fn replay_with_cancel(&self, id: RecordId, cancel: CancellationToken) -> Result<DispatchResult, ReplayError> {
        let original = self.pipeline.audit().find(id).await.map_err(|error| match error {
            AuditStoreError::NotFound(_) => ReplayError::RecordNotFound { id },
            other => ReplayError::Audit(other),
        })?;
        self.pipeline.ensure_dispatchable(&original.provider, &original.endpoint)?;

        let inputs = original.inputs;
        let entry = if let Some(model) = inputs.model {
            debug!(record_id = %id, "replaying from archived model");
            Entry::Model(model)
        } else if let Some(payload) = inputs.payload {
            debug!(record_id = %id, "replaying from archived payload");
            Entry::Payload {
                payload,
                path: inputs.path,
                headers: inputs.headers.unwrap_or_default(),
            }
        } else {
            return Err(ReplayError::InputsUnavailable { id });
        };

        let invocation = Invocation {
            provider: original.provider,
            endpoint: original.endpoint,
            entry,
            subject: original.subject,
            replay_of: Some(id),
        };
        let result = self.pipeline.execute(invocation, cancel).await?;
        self.pipeline
            .audit()
            .attach_replay(id, result.record_id)
            .await
            .map_err(ReplayError::Audit)?;
        info!(original = %id, replay = %result.record_id, outcome = %result.outcome, "replayed dispatch record");
        Ok(result)
    }
}
