use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{Client, Method, header};
use tracing::{debug, warn};

use crate::{HttpTransport, OutboundRequest, TransportError, TransportResponse};

/// Upper bound applied when a request carries no timeout of its own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            user_agent: format!("conduit/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|error| TransportError::InvalidRequest(format!("method '{}': {error}", request.method)))?;
        let timeout = request.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let mut builder = self
            .http
            .request(method.clone(), &request.url)
            .header(header::USER_AGENT, &self.user_agent)
            .timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %method, url = %request.url, "http request started");
        let response = builder.send().await.map_err(|error| {
            warn!(
                method = %method,
                url = %request.url,
                duration_ms = start.elapsed().as_millis(),
                error = %error,
                "http request failed"
            );
            classify_error(error, timeout)
        })?;

        let status = response.status().as_u16();
        let headers: IndexMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|error| classify_error(error, timeout))?;

        debug!(
            method = %method,
            url = %request.url,
            status,
            duration_ms = start.elapsed().as_millis(),
            "http request completed"
        );
        Ok(TransportResponse { status, headers, body })
    }
}

fn classify_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}
