//! Helpers for turning raw vendor response bodies into JSON values.

use serde_json::Value;

/// Parses a response body leniently.
///
/// Empty bodies yield `None`, JSON bodies their parsed value, and anything
/// else the raw text as a JSON string.
///
/// ```rust
/// use conduit_util::response::parse_body_lenient;
/// use serde_json::json;
///
/// assert_eq!(parse_body_lenient(r#"{"id": "ch_1"}"#), Some(json!({"id": "ch_1"})));
/// assert_eq!(parse_body_lenient("upstream exploded"), Some(json!("upstream exploded")));
/// assert_eq!(parse_body_lenient("  "), None);
/// ```
pub fn parse_body_lenient(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn html_error_pages_are_kept_as_text() {
        let body = "<html>\n<body>bad gateway</body>";
        assert_eq!(parse_body_lenient(body), Some(json!(body)));
    }

    #[test]
    fn scalar_json_bodies_parse() {
        assert_eq!(parse_body_lenient("42"), Some(json!(42)));
        assert_eq!(parse_body_lenient("\"ok\""), Some(json!("ok")));
    }
}
