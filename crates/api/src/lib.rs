//! Outbound HTTP transport for the Conduit gateway.
//!
//! The dispatch pipeline talks to vendors through the [`HttpTransport`] seam.
//! Production code uses [`ReqwestTransport`]; tests plug in scripted
//! implementations so no network access is needed.
//!
//! # Example
//!
//! ```ignore
//! use conduit_api::{HttpTransport, OutboundRequest, ReqwestTransport};
//!
//! let transport = ReqwestTransport::new()?;
//! let request = OutboundRequest::new("GET", "https://api.vendor.test/v1/ping");
//! let response = transport.send(&request).await?;
//! println!("status: {}", response.status);
//! ```

mod client;

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use client::ReqwestTransport;

/// Hostnames allowed to use plain `http` for local development.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// A fully prepared vendor request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Absolute URL without query string.
    pub url: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            query: Vec::new(),
            headers: IndexMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw vendor answer, whatever its status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lower-cased.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: IndexMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures that happen before any HTTP status was received.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Invalid requests fail the same way on every attempt; everything else may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

/// Sends one prepared request and returns the vendor answer.
#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// Flattens a payload object into query pairs. Arrays repeat the key; strings
/// are used verbatim and other values as JSON text. Non-object payloads yield
/// a single `value` pair.
pub fn build_query_pairs(payload: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    match payload {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            pairs.push((key.clone(), query_value_to_string(item)));
                        }
                    }
                    Value::Null => {}
                    other => pairs.push((key.clone(), query_value_to_string(other))),
                }
            }
        }
        Value::Null => {}
        other => pairs.push(("value".to_string(), query_value_to_string(other))),
    }
    pairs
}

fn query_value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Errors raised by [`validate_base_url`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BaseUrlError {
    #[error("invalid base URL '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("base URL '{0}' must include a host")]
    MissingHost(String),

    #[error("base URL '{url}' must use https for non-localhost hosts; got '{scheme}://'")]
    InsecureScheme { url: String, scheme: String },

    #[error("base URL '{0}' must not carry a query string or fragment")]
    UnexpectedSuffix(String),
}

/// Validate that a base URL is acceptable for vendor calls.
///
/// Rules:
/// - `localhost`, `127.0.0.1` and `[::1]`: `http` or `https`
/// - otherwise: scheme must be `https`
/// - no query string or fragment
pub fn validate_base_url(base: &str) -> Result<(), BaseUrlError> {
    let parsed = Url::parse(base).map_err(|error| BaseUrlError::Invalid {
        url: base.to_string(),
        reason: error.to_string(),
    })?;
    let host = parsed
        .host_str()
        .ok_or_else(|| BaseUrlError::MissingHost(base.to_string()))?;
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(BaseUrlError::UnexpectedSuffix(base.to_string()));
    }

    let is_local = LOCALHOST_DOMAINS.iter().any(|allowed| host.eq_ignore_ascii_case(allowed));
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if is_local => Ok(()),
        scheme => Err(BaseUrlError::InsecureScheme {
            url: base.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_url_rules() {
        assert!(validate_base_url("https://api.stripe.com").is_ok());
        assert!(validate_base_url("https://api.vendor.test/v2/").is_ok());
        assert!(validate_base_url("http://localhost:8080").is_ok());
        assert!(validate_base_url("http://127.0.0.1:9000/base").is_ok());
        assert!(matches!(
            validate_base_url("http://api.vendor.test"),
            Err(BaseUrlError::InsecureScheme { .. })
        ));
        assert!(matches!(validate_base_url("not a url"), Err(BaseUrlError::Invalid { .. })));
        assert!(matches!(
            validate_base_url("https://api.vendor.test?x=1"),
            Err(BaseUrlError::UnexpectedSuffix(_))
        ));
    }

    #[test]
    fn query_pairs_repeat_array_keys() {
        let pairs = build_query_pairs(&json!({ "limit": 10, "status": ["open", "paid"], "q": "a b", "skip": null }));
        assert_eq!(
            pairs,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("q".to_string(), "a b".to_string()),
                ("status".to_string(), "open".to_string()),
                ("status".to_string(), "paid".to_string()),
            ]
        );
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut request = OutboundRequest::new("post", "https://api.vendor.test/x");
        request.headers.insert("X-Signature".into(), "abc".into());
        assert_eq!(request.method, "POST");
        assert_eq!(request.header("x-signature"), Some("abc"));
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn only_invalid_requests_are_terminal() {
        assert!(TransportError::Timeout { after_ms: 10 }.is_retryable());
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad method".into()).is_retryable());
    }
}
