//! Loopback HTTP server for programmatic access to the orchestrator.
//!
//! `POST /request` for a single JSON response, `POST /stream` for
//! newline-delimited JSON stream tokens, `GET /health` for provider
//! status. Binds loopback only; config validation rejects anything else.

use crate::errors::CrucibleError;
use crate::orchestrator::Orchestrator;
use crate::request::RequestDraft;
use crate::utils::cancel::CancelSignal;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/request", post(request_handler))
        .route("/stream", post(stream_handler))
        .route("/health", get(health_handler))
        .with_state(orchestrator)
}

/// Interval at which unavailable providers are re-probed.
const PROBE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub async fn serve(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let config = orchestrator.config().gateway.clone();
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // Periodic health probes let providers return from cool-down.
    let prober = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROBE_INTERVAL);
        loop {
            interval.tick().await;
            prober.probe_providers().await;
        }
    });

    let app = build_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down gateway");
        })
        .await?;
    Ok(())
}

fn error_response(err: &CrucibleError) -> Response {
    let status = match err {
        CrucibleError::Validation(_) | CrucibleError::ToolValidation { .. } => {
            StatusCode::BAD_REQUEST
        }
        CrucibleError::ProviderUnavailable { .. } | CrucibleError::NoToolCapableProvider => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CrucibleError::ProviderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, axum::Json(json!({ "error": err.report() }))).into_response()
}

/// POST /request — non-streaming completion.
async fn request_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    axum::Json(draft): axum::Json<RequestDraft>,
) -> Response {
    let req = match orchestrator.accept(draft) {
        Ok(req) => req,
        Err(e) => return error_response(&e),
    };
    match orchestrator.complete(&req, CancelSignal::never()).await {
        Ok(report) => axum::Json(json!({
            "response": report.response,
            "escalated": report.escalated,
            "providers": report.providers,
            "total_time_ms": report.total_time.as_millis() as u64,
        }))
        .into_response(),
        Err(e) => {
            error!("request failed: {e}");
            error_response(&e)
        }
    }
}

/// POST /stream — newline-delimited JSON stream tokens. The terminal
/// token carries `is_complete = true` plus any tool calls or error.
async fn stream_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    axum::Json(mut draft): axum::Json<RequestDraft>,
) -> Response {
    draft.stream = true;
    let req = match orchestrator.accept(draft) {
        Ok(req) => req,
        Err(e) => return error_response(&e),
    };
    let mut session = match orchestrator.stream(&req, CancelSignal::never()).await {
        Ok(session) => session,
        Err(e) => return error_response(&e),
    };

    let (tx, rx) = mpsc::channel::<Result<String, std::io::Error>>(16);
    tokio::spawn(async move {
        while let Some(token) = session.tokens.recv().await {
            let mut line = serde_json::to_string(&token).unwrap_or_default();
            line.push('\n');
            if tx.send(Ok(line)).await.is_err() {
                break;
            }
        }
    });

    let body = Body::from_stream(tokio_stream_wrapper(rx));
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}

fn tokio_stream_wrapper(
    rx: mpsc::Receiver<Result<String, std::io::Error>>,
) -> impl futures_util::Stream<Item = Result<String, std::io::Error>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

/// GET /health — `{healthy, providers}` snapshot.
async fn health_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    let report = orchestrator.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(report)).into_response()
}

#[cfg(test)]
mod tests;
