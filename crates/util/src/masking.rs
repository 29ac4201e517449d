//! # Masking
//!
//! Replaces sensitive values in JSON trees, strings and header maps with a
//! fixed mask token before anything is persisted. Two rules apply:
//!
//! * any value stored under a sensitive field name is replaced wholesale;
//! * any verbatim occurrence of a registered secret value is replaced inside
//!   strings and object keys, and a number whose JSON text equals a secret is
//!   replaced wholesale.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;

/// Token written in place of masked values unless configured otherwise.
pub const DEFAULT_MASK_TOKEN: &str = "[MASKED]";

/// Field and header names that are always treated as sensitive.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "authorization",
    "proxy_authorization",
    "cookie",
    "set_cookie",
    "password",
    "passwd",
    "secret",
    "client_secret",
    "token",
    "access_token",
    "refresh_token",
    "id_token",
    "api_key",
    "apikey",
    "x_api_key",
    "card_number",
    "cvv",
    "cvc",
];

/// Secrets shorter than this are masked only where a whole string, number or
/// object key equals them. Substring replacement of one- to three-character
/// values would rewrite unrelated text, so such a secret still survives when
/// embedded in a longer string (`"k"` inside `"kiwi"`).
const MIN_SUBSTRING_SECRET_LENGTH: usize = 4;

/// Applies field-name and secret-value masking with one mask token.
#[derive(Debug, Clone)]
pub struct Masker {
    token: String,
    fields: HashSet<String>,
    secrets: Vec<String>,
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_TOKEN)
    }
}

impl Masker {
    /// Creates a masker seeded with [`DEFAULT_SENSITIVE_FIELDS`].
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|field| normalize_field(field)).collect(),
            secrets: Vec::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Adds more sensitive field names. Matching ignores case and treats `-` as `_`.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_fields(fields);
        self
    }

    pub fn add_fields<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            let normalized = normalize_field(field.as_ref());
            if !normalized.is_empty() {
                self.fields.insert(normalized);
            }
        }
    }

    /// Registers a resolved secret value. Empty values are ignored.
    pub fn add_secret(&mut self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() || self.secrets.contains(&secret) {
            return;
        }
        self.secrets.push(secret);
        // Longest first so a secret that contains another is replaced whole.
        self.secrets.sort_by_key(|secret| std::cmp::Reverse(secret.len()));
    }

    pub fn is_sensitive_field(&self, name: &str) -> bool {
        self.fields.contains(&normalize_field(name))
    }

    /// Masks registered secret values inside a string.
    pub fn mask_str(&self, input: &str) -> String {
        let mut masked = input.to_string();
        for secret in &self.secrets {
            if masked == *secret {
                return self.token.clone();
            }
            if secret.len() >= MIN_SUBSTRING_SECRET_LENGTH && masked.contains(secret.as_str()) {
                masked = masked.replace(secret.as_str(), &self.token);
            }
        }
        masked
    }

    /// Recursively masks a JSON tree.
    pub fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.mask_str(text)),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.mask_value(item)).collect()),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, item) in map {
                    let masked = if self.is_sensitive_field(key) && !item.is_null() {
                        Value::String(self.token.clone())
                    } else {
                        self.mask_value(item)
                    };
                    out.insert(self.mask_str(key), masked);
                }
                Value::Object(out)
            }
            Value::Number(number) => {
                let text = number.to_string();
                if self.secrets.contains(&text) {
                    Value::String(self.token.clone())
                } else {
                    value.clone()
                }
            }
            other => other.clone(),
        }
    }

    pub fn mask_headers(&self, headers: &IndexMap<String, String>) -> IndexMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let masked = if self.is_sensitive_field(name) {
                    self.token.clone()
                } else {
                    self.mask_str(value)
                };
                (name.clone(), masked)
            })
            .collect()
    }

    /// True when masking would leave the value untouched.
    pub fn is_clean(&self, value: &Value) -> bool {
        self.mask_value(value) == *value
    }
}

fn normalize_field(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

/// Renders a secret for diagnostics as its first and last two characters.
///
/// ```rust
/// use conduit_util::masking::mask_for_diagnostics;
///
/// assert_eq!(mask_for_diagnostics("sk_live_abcdef"), "sk****ef");
/// assert_eq!(mask_for_diagnostics("short"), "****");
/// ```
pub fn mask_for_diagnostics(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 8 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_fields_are_replaced_at_any_depth() {
        let masker = Masker::default().with_fields(["card-Number"]);
        let masked = masker.mask_value(&json!({
            "amount": 250,
            "source": { "card_number": "4242424242424242", "exp": "12/30" },
            "items": [{ "password": "hunter2" }],
            "token": null
        }));
        assert_eq!(
            masked,
            json!({
                "amount": 250,
                "source": { "card_number": "[MASKED]", "exp": "12/30" },
                "items": [{ "password": "[MASKED]" }],
                "token": null
            })
        );
    }

    #[test]
    fn secret_values_are_replaced_inside_strings() {
        let mut masker = Masker::new("***");
        masker.add_secret("sk_live_123456");
        let masked = masker.mask_value(&json!({ "note": "called with sk_live_123456 today" }));
        assert_eq!(masked, json!({ "note": "called with *** today" }));
    }

    #[test]
    fn short_secrets_only_mask_exact_values() {
        let mut masker = Masker::default();
        masker.add_secret("k");
        assert_eq!(masker.mask_str("k"), "[MASKED]");
        assert_eq!(masker.mask_str("kiwi"), "kiwi");
    }

    #[test]
    fn numeric_secrets_and_secret_keys_are_masked() {
        let mut masker = Masker::default();
        masker.add_secret("482913");
        masker.add_secret("acct_secret_7");
        masker.add_secret("42");
        let masked = masker.mask_value(&json!({
            "pin": 482913,
            "retries": 42,
            "acct_secret_7": { "balance": 10 },
            "note": "pin 42 on file"
        }));
        assert_eq!(
            masked,
            json!({
                "pin": "[MASKED]",
                "retries": "[MASKED]",
                "[MASKED]": { "balance": 10 },
                "note": "pin 42 on file"
            })
        );
        assert!(!masker.is_clean(&json!(482913)));
        assert!(masker.is_clean(&json!(4829130)));
    }

    #[test]
    fn headers_mask_by_name_and_value() {
        let mut masker = Masker::default();
        masker.add_secret("topsecretvalue");
        let mut headers = IndexMap::new();
        headers.insert("Authorization".to_string(), "Basic dXNlcjpwYXNz".to_string());
        headers.insert("X-Trace".to_string(), "topsecretvalue-1".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let masked = masker.mask_headers(&headers);
        assert_eq!(masked["Authorization"], "[MASKED]");
        assert_eq!(masked["X-Trace"], "[MASKED]-1");
        assert_eq!(masked["Content-Type"], "application/json");
    }

    #[test]
    fn is_clean_detects_sensitive_content() {
        let mut masker = Masker::default();
        masker.add_secret("whsec_abcdef");
        assert!(masker.is_clean(&json!({ "amount": 1 })));
        assert!(!masker.is_clean(&json!({ "api_key": "x" })));
        assert!(!masker.is_clean(&json!(["whsec_abcdef"])));
    }
}
