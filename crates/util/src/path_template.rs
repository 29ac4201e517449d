//! Endpoint path templates with `{placeholder}` segments.

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;
use thiserror::Error;

/// Everything except RFC 3986 unreserved bytes (`A-Z a-z 0-9 - . _ ~`).
const PATH_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathTemplateError {
    #[error("unclosed placeholder starting at byte {offset} in '{template}'")]
    Unclosed { template: String, offset: usize },

    #[error("empty placeholder in '{template}'")]
    Empty { template: String },

    #[error("path parameter '{name}' has no value")]
    Missing { name: String },
}

/// Returns placeholder names in order of appearance, duplicates included once.
///
/// ```rust
/// use conduit_util::path_template::placeholders;
///
/// let names = placeholders("/v1/customers/{customer_id}/charges/{model.charge.id}").unwrap();
/// assert_eq!(names, vec!["customer_id", "model.charge.id"]);
/// ```
pub fn placeholders(template: &str) -> Result<Vec<String>, PathTemplateError> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    let mut consumed = 0;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(PathTemplateError::Unclosed {
                template: template.to_string(),
                offset: consumed + start,
            });
        };
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(PathTemplateError::Empty {
                template: template.to_string(),
            });
        }
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
        let advance = start + 1 + end + 1;
        consumed += advance;
        rest = &rest[advance..];
    }
    Ok(names)
}

/// Substitutes every placeholder with its percent-encoded value.
///
/// Strings are inserted verbatim before encoding, other scalars as their JSON
/// text. A placeholder without a value, or with a null value, is an error.
pub fn render_path(template: &str, values: &IndexMap<String, Value>) -> Result<String, PathTemplateError> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(PathTemplateError::Unclosed {
                template: template.to_string(),
                offset: template.len() - rest.len() + start,
            });
        };
        let name = after[..end].trim();
        let value = match values.get(name) {
            None | Some(Value::Null) => return Err(PathTemplateError::Missing { name: name.to_string() }),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        path.push_str(&encode_path_value(&value));
        rest = &after[end + 1..];
    }
    path.push_str(rest);
    Ok(path)
}

/// Percent-encodes a single path segment value.
pub fn encode_path_value(value: &str) -> String {
    utf8_percent_encode(value, PATH_VALUE).to_string()
}

/// Joins a base URL and a relative path with exactly one slash between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_path_preserves_unreserved_bytes() {
        let mut values = IndexMap::new();
        values.insert("service_id".to_string(), json!("srv-d5f6a7b8"));
        let path = render_path("/v1/services/{service_id}", &values).unwrap();
        assert_eq!(path, "/v1/services/srv-d5f6a7b8");
    }

    #[test]
    fn render_path_encodes_reserved_bytes() {
        let mut values = IndexMap::new();
        values.insert("project".to_string(), json!("team/app name"));
        values.insert("n".to_string(), json!(42));
        let path = render_path("/v1/projects/{project}/items/{ n }", &values).unwrap();
        assert_eq!(path, "/v1/projects/team%2Fapp%20name/items/42");
    }

    #[test]
    fn render_path_reports_missing_values() {
        let mut values = IndexMap::new();
        values.insert("id".to_string(), Value::Null);
        let error = render_path("/v1/things/{id}", &values).unwrap_err();
        assert_eq!(error, PathTemplateError::Missing { name: "id".into() });
    }

    #[test]
    fn placeholders_rejects_malformed_templates() {
        assert!(matches!(placeholders("/v1/{open"), Err(PathTemplateError::Unclosed { offset: 4, .. })));
        assert!(matches!(placeholders("/v1/{}"), Err(PathTemplateError::Empty { .. })));
        assert_eq!(placeholders("/v1/{a}/{a}").unwrap(), vec!["a"]);
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://api.test/", "/v1/x"), "https://api.test/v1/x");
        assert_eq!(join_url("https://api.test", "v1/x"), "https://api.test/v1/x");
        assert_eq!(join_url("https://api.test/", ""), "https://api.test");
    }
}
