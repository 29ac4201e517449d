//! Accumulates what a dispatch did and turns it into a masked record.

use chrono::{DateTime, Utc};
use conduit_api::TransportResponse;
use conduit_types::{
    DispatchRecord, DispatchStage, ErrorKind, Outcome, RecordId, RecordedError, RecordedRequest, RecordedResponse,
    ReplayInputs, Subject,
};
use conduit_util::Masker;
use indexmap::IndexMap;
use serde_json::Value;

/// Unmasked working state of one dispatch. Only [`DispatchTrace::into_record`]
/// produces something that may be persisted.
#[derive(Debug)]
pub(crate) struct DispatchTrace {
    pub id: RecordId,
    pub provider: String,
    pub endpoint: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    pub subject: Option<Subject>,
    pub replay_of: Option<RecordId>,
    pub stage: DispatchStage,
    pub request: RecordedRequest,
    pub response: Option<TransportResponse>,
    pub response_body: Option<Value>,
    pub attempts: u32,
    pub error: Option<RecordedError>,
    pub inputs: ReplayInputs,
}

impl DispatchTrace {
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>, field: Option<String>) {
        self.error = Some(RecordedError {
            kind,
            stage: self.stage,
            message: message.into(),
            field,
        });
    }

    pub fn outcome(&self) -> Outcome {
        match &self.error {
            None => Outcome::Success,
            Some(error) if error.kind == ErrorKind::Vendor => Outcome::Fail,
            Some(_) => Outcome::Error,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|response| response.status)
    }

    /// Builds the persisted record. Every request, response and error field
    /// goes through `masker`; replay inputs are kept only when masking would
    /// not have changed them.
    pub fn into_record(self, masker: &Masker, latency_ms: u64) -> DispatchRecord {
        let outcome = self.outcome();
        let status = self.status();
        let request = RecordedRequest {
            method: self.request.method,
            url: masker.mask_str(&self.request.url),
            headers: masker.mask_headers(&self.request.headers),
            body: self.request.body.as_ref().map(|body| masker.mask_value(body)),
        };
        let response = self.response.map(|response| RecordedResponse {
            status: response.status,
            headers: masker.mask_headers(&response.headers),
            body: self.response_body.as_ref().map(|body| masker.mask_value(body)),
        });
        let error = self.error.map(|error| RecordedError {
            message: masker.mask_str(&error.message),
            ..error
        });
        DispatchRecord {
            id: self.id,
            provider: self.provider,
            endpoint: self.endpoint,
            environment: self.environment,
            request,
            response,
            status,
            latency_ms,
            attempts: self.attempts,
            outcome,
            error,
            created_at: self.created_at,
            subject: self.subject,
            replay_of: self.replay_of,
            replays: Vec::new(),
            inputs: retain_clean(self.inputs, masker),
        }
    }
}

fn retain_clean(inputs: ReplayInputs, masker: &Masker) -> ReplayInputs {
    ReplayInputs {
        model: inputs.model.filter(|model| masker.is_clean(model)),
        payload: inputs.payload.filter(|payload| masker.is_clean(payload)),
        path: inputs.path.filter(|path| masker.mask_str(path) == *path),
        headers: inputs.headers.filter(|headers| headers_clean(headers, masker)),
    }
}

fn headers_clean(headers: &IndexMap<String, String>, masker: &Masker) -> bool {
    masker.mask_headers(headers) == *headers
}
