//! Thin HTTP adapter: `METHOD /{provider}/{endpoint}` with a JSON body becomes
//! one dispatch. The response is the [`DispatchResult`] as JSON.

use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use conduit_engine::{DispatchPipeline, DispatchRequest, GatewayError};
use conduit_types::{DispatchResult, ErrorKind, Subject};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Optional `TYPE:ID` subject attached to proxied dispatches.
pub const SUBJECT_HEADER: &str = "x-conduit-subject";

pub fn router(pipeline: DispatchPipeline) -> Router {
    Router::new()
        .route("/{provider}/{endpoint}", any(proxy_dispatch))
        .with_state(pipeline)
}

/// `--bind` wins over the configured address.
pub fn resolve_bind_address(flag: Option<SocketAddr>, configured: &str) -> Result<SocketAddr> {
    if let Some(address) = flag {
        return Ok(address);
    }
    configured
        .parse()
        .map_err(|error| anyhow!("invalid bind address '{configured}': {error}"))
}

/// Serves until Ctrl-C.
pub async fn serve(pipeline: DispatchPipeline, bind_address: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("bind {bind_address}"))?;
    let bound_address = listener.local_addr()?;
    info!(address = %bound_address, "dispatch proxy listening");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("dispatch proxy failed")?;
    info!("dispatch proxy stopped");
    Ok(())
}

async fn proxy_dispatch(
    State(pipeline): State<DispatchPipeline>,
    Path((provider, endpoint)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let model = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(model) => model,
            Err(error) => return error_response(StatusCode::BAD_REQUEST, format!("request body is not JSON: {error}")),
        }
    };
    let mut request = DispatchRequest::new(provider, endpoint, model);
    if let Some(raw) = headers.get(SUBJECT_HEADER) {
        match raw.to_str().ok().and_then(|raw| raw.parse::<Subject>().ok()) {
            Some(subject) => request = request.with_subject(subject),
            None => return error_response(StatusCode::BAD_REQUEST, format!("{SUBJECT_HEADER} must be TYPE:ID")),
        }
    }

    // A caller that disconnects drops this future, which fires the token; the
    // spawned dispatch then records itself as cancelled.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn(async move { pipeline.dispatch_with_cancel(request, cancel).await });
    let joined = task.await;
    guard.disarm();

    match joined {
        Ok(Ok(result)) => (status_for(&result), Json(result)).into_response(),
        Ok(Err(GatewayError::ConfigNotFound {
            provider,
            endpoint,
            reason,
        })) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": ErrorKind::ConfigNotFound,
                "provider": provider,
                "endpoint": endpoint,
                "reason": reason,
            })),
        )
            .into_response(),
        Ok(Err(error)) => {
            warn!(error = %error, "dispatch could not be recorded");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        Err(error) => {
            warn!(error = %error, "dispatch task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "dispatch task failed".to_string())
        }
    }
}

/// 200 on success, 502 when the vendor or the network failed, 422 when the
/// request could not be built or signed.
pub fn status_for(result: &DispatchResult) -> StatusCode {
    if result.success {
        return StatusCode::OK;
    }
    match result.error_kind() {
        Some(ErrorKind::Vendor | ErrorKind::Transport | ErrorKind::Cancelled) | None => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::ConfigNotFound) => StatusCode::NOT_FOUND,
        Some(
            ErrorKind::Mapping
            | ErrorKind::Auth
            | ErrorKind::ExpressionSyntax
            | ErrorKind::ExpressionRuntime
            | ErrorKind::Replay,
        ) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
