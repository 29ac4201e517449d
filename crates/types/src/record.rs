//! Dispatch records, results and the caller-visible error classification.

use std::{error::Error, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a dispatch record. UUID v7, so ids sort by creation time.
pub type RecordId = Uuid;

/// Allocates a fresh time-ordered record id.
pub fn new_record_id() -> RecordId {
    Uuid::now_v7()
}

/// Optional business-entity reference attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl Subject {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for Subject {
    type Err = ParseSubjectError;

    /// Parses `TYPE:ID`; the id may itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or(ParseSubjectError)?;
        let (kind, id) = (kind.trim(), id.trim());
        if kind.is_empty() || id.is_empty() {
            return Err(ParseSubjectError);
        }
        Ok(Self::new(kind, id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseSubjectError;

impl fmt::Display for ParseSubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid subject; expected 'TYPE:ID'")
    }
}

impl Error for ParseSubjectError {}

/// Final classification of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The vendor answered with a 2xx status.
    Success,
    /// The vendor answered with a non-2xx status.
    Fail,
    /// No usable vendor answer: mapping, auth, transport or cancellation failure.
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Error => "error",
        })
    }
}

impl FromStr for Outcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            "error" => Ok(Self::Error),
            _ => Err(ParseOutcomeError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOutcomeError;

impl fmt::Display for ParseOutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid outcome; expected 'success', 'fail' or 'error'")
    }
}

impl Error for ParseOutcomeError {}

/// Persisted, caller-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigNotFound,
    ExpressionSyntax,
    ExpressionRuntime,
    Mapping,
    Auth,
    Transport,
    Vendor,
    Cancelled,
    Replay,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConfigNotFound => "config_not_found",
            Self::ExpressionSyntax => "expression_syntax",
            Self::ExpressionRuntime => "expression_runtime",
            Self::Mapping => "mapping",
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::Vendor => "vendor",
            Self::Cancelled => "cancelled",
            Self::Replay => "replay",
        })
    }
}

/// Pipeline state machine. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchStage {
    ResolvingConfig,
    BuildingPayload,
    Signing,
    Sending,
    Recording,
    Done,
    Failed,
}

impl DispatchStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResolvingConfig => "resolving-config",
            Self::BuildingPayload => "building-payload",
            Self::Signing => "signing",
            Self::Sending => "sending",
            Self::Recording => "recording",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Error details kept on a record and returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub kind: ErrorKind,
    /// Stage the pipeline was in when the error occurred.
    pub stage: DispatchStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Outgoing request as recorded (masked).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    /// Absolute URL without query string.
    pub url: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Built payload; sent as query parameters for GET/DELETE, otherwise as JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Vendor response as recorded (masked).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Inputs retained for replay. Each part is only present when it was free of
/// sensitive values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<IndexMap<String, String>>,
}

impl ReplayInputs {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.payload.is_none()
    }
}

/// Immutable audit entry for one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: RecordId,
    pub provider: String,
    pub endpoint: String,
    #[serde(default)]
    pub environment: String,
    pub request: RecordedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RecordedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub attempts: u32,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_of: Option<RecordId>,
    /// Records produced by replaying this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replays: Vec<RecordId>,
    #[serde(default)]
    pub inputs: ReplayInputs,
}

/// What a dispatch (live or replay) returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    pub record_id: RecordId,
    pub provider: String,
    pub endpoint: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response object produced by the extraction rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Unmasked vendor body as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,
    pub attempts: u32,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_of: Option<RecordId>,
}

impl DispatchResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|error| error.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_parses_type_and_id() {
        let subject: Subject = "order:ord_42".parse().expect("parse subject");
        assert_eq!(subject, Subject::new("order", "ord_42"));
        assert_eq!(subject.to_string(), "order:ord_42");

        let subject: Subject = "urn:a:b".parse().expect("parse subject with colons");
        assert_eq!(subject.id, "a:b");

        assert!("order".parse::<Subject>().is_err());
        assert!(":42".parse::<Subject>().is_err());
    }

    #[test]
    fn subject_serializes_type_key() {
        let json = serde_json::to_value(Subject::new("customer", "c1")).expect("serialize subject");
        assert_eq!(json, serde_json::json!({ "type": "customer", "id": "c1" }));
    }

    #[test]
    fn enums_use_wire_names() {
        assert_eq!(serde_json::to_value(ErrorKind::ConfigNotFound).unwrap(), "config_not_found");
        assert_eq!(serde_json::to_value(DispatchStage::BuildingPayload).unwrap(), "building-payload");
        assert_eq!(serde_json::to_value(Outcome::Fail).unwrap(), "fail");
        assert_eq!("ERROR".parse::<Outcome>(), Ok(Outcome::Error));
        assert_eq!(DispatchStage::Sending.to_string(), "sending");
        assert!(DispatchStage::Failed.is_terminal());
        assert!(!DispatchStage::Recording.is_terminal());
    }

    #[test]
    fn record_ids_are_time_ordered() {
        let first = new_record_id();
        let second = new_record_id();
        assert!(first < second);
    }

    #[test]
    fn record_tolerates_missing_optional_fields() {
        let json = serde_json::json!({
            "id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "provider": "stripe",
            "endpoint": "charge",
            "request": { "method": "POST", "url": "https://api.stripe.test/v1/charges" },
            "latency_ms": 12,
            "attempts": 1,
            "outcome": "success",
            "created_at": "2024-05-01T10:00:00Z"
        });
        let record: DispatchRecord = serde_json::from_value(json).expect("deserialize record");
        assert!(record.replays.is_empty());
        assert!(record.inputs.is_empty());
        assert_eq!(record.environment, "");
    }
}
