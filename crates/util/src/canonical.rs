//! Deterministic JSON rendering used for signatures and payload comparison.

use serde_json::Value;

/// Renders `value` as compact JSON with object keys sorted at every depth.
///
/// Signatures are computed over this form, so two payloads that differ only
/// in key order sign identically.
///
/// ```rust
/// use conduit_util::canonical::canonical_json;
/// use serde_json::json;
///
/// assert_eq!(canonical_json(&json!({"b": [2, {"d": 1, "c": 0}], "a": 1})), r#"{"a":1,"b":[2,{"c":0,"d":1}]}"#);
/// ```
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical form of an optional body. An absent body canonicalizes to the empty string.
pub fn canonical_body(body: Option<&Value>) -> String {
    body.map(canonical_json).unwrap_or_default()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(item) = map.get(key) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_keys_are_sorted() {
        let value = json!({ "z": { "y": 1, "x": [true, null] }, "a": "q\"uote" });
        assert_eq!(canonical_json(&value), r#"{"a":"q\"uote","z":{"x":[true,null],"y":1}}"#);
    }

    #[test]
    fn empty_body_is_empty_string() {
        assert_eq!(canonical_body(None), "");
        assert_eq!(canonical_body(Some(&json!({"a": 1}))), r#"{"a":1}"#);
    }
}
