//! Flat tabular rendering of records for export.

use conduit_types::DispatchRecord;

pub const TABULAR_COLUMNS: &[&str] = &[
    "id",
    "created_at",
    "provider",
    "endpoint",
    "environment",
    "method",
    "url",
    "status",
    "outcome",
    "error_kind",
    "latency_ms",
    "attempts",
    "subject",
    "replay_of",
];

/// Tab-separated header line.
pub fn tabular_header() -> String {
    TABULAR_COLUMNS.join("\t")
}

/// One tab-separated row; tabs and newlines inside values become spaces.
pub fn tabular_row(record: &DispatchRecord) -> String {
    let cells = [
        record.id.to_string(),
        record.created_at.to_rfc3339(),
        record.provider.clone(),
        record.endpoint.clone(),
        record.environment.clone(),
        record.request.method.clone(),
        record.request.url.clone(),
        record.status.map(|status| status.to_string()).unwrap_or_default(),
        record.outcome.to_string(),
        record
            .error
            .as_ref()
            .map(|error| error.kind.to_string())
            .unwrap_or_default(),
        record.latency_ms.to_string(),
        record.attempts.to_string(),
        record.subject.as_ref().map(ToString::to_string).unwrap_or_default(),
        record.replay_of.map(|id| id.to_string()).unwrap_or_default(),
    ];
    cells.iter().map(|cell| sanitize_cell(cell)).collect::<Vec<_>>().join("\t")
}

fn sanitize_cell(cell: &str) -> String {
    cell.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;
    use conduit_types::Outcome;

    #[test]
    fn row_has_one_cell_per_column() {
        let mut entry = record("stripe", "charge", Outcome::Success, "2024-05-01T10:00:00Z");
        entry.request.url = "https://x.test/a\tb".to_string();
        let row = tabular_row(&entry);
        assert_eq!(row.split('\t').count(), TABULAR_COLUMNS.len());
        assert!(row.contains("https://x.test/a b"));
        assert!(row.contains("order:stripe-charge"));
        assert_eq!(tabular_header().split('\t').next(), Some("id"));
    }
}
