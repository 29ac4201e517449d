use chrono::{DateTime, Utc};
use conduit_types::{DispatchRecord, Outcome, Subject};

/// Criteria for [`crate::AuditStore::list`]. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub outcome: Option<Outcome>,
    pub subject: Option<Subject>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Matching records to skip before yielding.
    pub offset: usize,
    /// Maximum records to yield.
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn page(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Checks the record criteria; pagination is applied by the stream.
    pub fn matches(&self, record: &DispatchRecord) -> bool {
        if self.provider.as_ref().is_some_and(|provider| *provider != record.provider) {
            return false;
        }
        if self.endpoint.as_ref().is_some_and(|endpoint| *endpoint != record.endpoint) {
            return false;
        }
        if self.outcome.is_some_and(|outcome| outcome != record.outcome) {
            return false;
        }
        if let Some(subject) = &self.subject
            && record.subject.as_ref() != Some(subject)
        {
            return false;
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at >= until) {
            return false;
        }
        true
    }

    pub(crate) fn take_count(&self) -> usize {
        self.limit.unwrap_or(usize::MAX)
    }
}
