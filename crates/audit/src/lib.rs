//! Append-only audit log of dispatch attempts.
//!
//! Every dispatch (live or replay) produces exactly one [`DispatchRecord`].
//! Stores expose lookup, filtered listing as a lazy forward-only stream,
//! retention purge, and replay lineage. Appending and purging are the only
//! ways entries are created or removed; the lineage back-reference is the
//! only thing ever attached to an existing entry.

mod export;
mod filter;
mod jsonl;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use conduit_types::{DispatchRecord, RecordId};
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use export::{TABULAR_COLUMNS, tabular_header, tabular_row};
pub use filter::RecordFilter;
pub use jsonl::{JsonlAuditStore, LINEAGE_FILE_NAME};
pub use memory::InMemoryAuditStore;

/// Lazy, forward-only sequence of records produced by [`AuditStore::list`].
pub type RecordStream<'a> = BoxStream<'a, Result<DispatchRecord, AuditStoreError>>;

/// Errors surfaced by audit store operations.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    #[error("dispatch record {0} not found")]
    NotFound(RecordId),

    #[error("dispatch record {0} already exists")]
    Duplicate(RecordId),

    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared trait implemented by audit persistence backends.
#[async_trait]
pub trait AuditStore: Send + Sync + std::fmt::Debug {
    /// Persist a new record. Fails with [`AuditStoreError::Duplicate`] if the id is taken.
    async fn append(&self, record: DispatchRecord) -> Result<RecordId, AuditStoreError>;

    /// Fetch one record with its replay back-references attached.
    async fn find(&self, id: RecordId) -> Result<DispatchRecord, AuditStoreError>;

    /// Stream records matching `filter`: partitions in provider order, then append order.
    fn list(&self, filter: RecordFilter) -> RecordStream<'_>;

    /// Remove every record created strictly before `cutoff`; returns how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditStoreError>;

    /// Record that `replay` re-executed `original`.
    async fn attach_replay(&self, original: RecordId, replay: RecordId) -> Result<(), AuditStoreError>;

    /// Remove every record older than `retention`, measured from now.
    async fn purge_older_than(&self, retention: TimeDelta) -> Result<usize, AuditStoreError> {
        let cutoff = Utc::now().checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_before(cutoff).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use conduit_types::{DispatchRecord, Outcome, RecordedRequest, ReplayInputs, Subject, new_record_id};

    pub fn record(provider: &str, endpoint: &str, outcome: Outcome, created_at: &str) -> DispatchRecord {
        DispatchRecord {
            id: new_record_id(),
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            environment: "sandbox".to_string(),
            request: RecordedRequest {
                method: "POST".to_string(),
                url: format!("https://{provider}.test/{endpoint}"),
                ..RecordedRequest::default()
            },
            response: None,
            status: Some(200),
            latency_ms: 5,
            attempts: 1,
            outcome,
            error: None,
            created_at: DateTime::parse_from_rfc3339(created_at)
                .expect("valid timestamp")
                .with_timezone(&Utc),
            subject: Some(Subject::new("order", format!("{provider}-{endpoint}"))),
            replay_of: None,
            replays: Vec::new(),
            inputs: ReplayInputs::default(),
        }
    }
}
