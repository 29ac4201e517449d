//! # Date Handling Utilities
//!
//! Parsing of loosely typed date inputs and strftime formatting, used by the
//! `date_format` expression function.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Interprets a JSON value as a UTC timestamp.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD` dates (midnight UTC), naive
/// `YYYY-MM-DDTHH:MM:SS` timestamps (taken as UTC), and integer or float
/// epoch seconds, either as numbers or numeric strings.
///
/// ```rust
/// use conduit_util::date_handling::parse_timestamp;
/// use serde_json::json;
///
/// let parsed = parse_timestamp(&json!("2024-03-05")).unwrap();
/// assert_eq!(parsed.to_rfc3339(), "2024-03-05T00:00:00+00:00");
/// assert!(parse_timestamp(&json!("yesterday")).is_none());
/// ```
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            if let Some(seconds) = number.as_i64() {
                return DateTime::from_timestamp(seconds, 0);
            }
            number.as_f64().and_then(from_fractional_seconds)
        }
        Value::String(text) => parse_timestamp_str(text),
        _ => None,
    }
}

/// String form of [`parse_timestamp`].
pub fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(seconds) = text.parse::<i64>() {
        return DateTime::from_timestamp(seconds, 0);
    }
    None
}

fn from_fractional_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Formats a timestamp with a chrono strftime pattern.
///
/// Returns `None` when the pattern contains an invalid specifier instead of
/// panicking inside chrono's `Display` implementation.
pub fn format_timestamp(timestamp: &DateTime<Utc>, pattern: &str) -> Option<String> {
    use chrono::format::{Item, StrftimeItems};
    use std::fmt::Write as _;

    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    let mut out = String::new();
    write!(out, "{}", timestamp.format_with_items(items.into_iter())).ok()?;
    Some(out)
}
