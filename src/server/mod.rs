//! HTTP surface. Thin: every handler decodes, calls the router and maps the
//! envelope onto a status code.

mod files;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::envelope::{Failure, FailureKind, ResponseEnvelope};
use crate::router::RequestRouter;
use crate::wire::{GenerateBody, GenerateResponse, RestoreBody, RestoreResponse};

pub type AppState = Arc<RequestRouter>;

pub fn app(router: AppState) -> Router {
    Router::new()
        .route("/restore", post(restore))
        .route("/generate", post(generate))
        .route("/result/{*path}", get(files::result))
        .route("/list_images", get(files::list_images))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

/// Bind and serve until the task is cancelled.
pub async fn serve(bind: &str, router: AppState) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(router))
        .await
        .context("server terminated")
}

/// HTTP status for an envelope. Timeouts are distinguished from crashes.
pub fn status_for(envelope: &ResponseEnvelope) -> StatusCode {
    let Some(failure) = envelope.failure() else {
        return StatusCode::OK;
    };
    match failure.kind {
        FailureKind::Validation => StatusCode::BAD_REQUEST,
        FailureKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::Invocation if failure.diagnostics.timed_out => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::Invocation => StatusCode::INTERNAL_SERVER_ERROR,
        FailureKind::Resolution => StatusCode::BAD_GATEWAY,
    }
}

fn malformed_body(rejection: JsonRejection) -> ResponseEnvelope {
    Failure::validation("body", format!("malformed request body: {}", rejection.body_text())).into()
}

async fn restore(
    State(router): State<AppState>,
    body: Result<Json<RestoreBody>, JsonRejection>,
) -> (StatusCode, Json<RestoreResponse>) {
    let envelope = match body {
        Ok(Json(body)) => router.handle_restore(body).await,
        Err(rejection) => malformed_body(rejection),
    };
    (status_for(&envelope), Json(envelope.into()))
}

async fn generate(
    State(router): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> (StatusCode, Json<GenerateResponse>) {
    let envelope = match body {
        Ok(Json(body)) => router.handle_generate(body).await,
        Err(rejection) => malformed_body(rejection),
    };
    (status_for(&envelope), Json(envelope.into()))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    backends: Vec<BackendHealth>,
}

#[derive(Debug, Serialize)]
struct BackendHealth {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<String>,
}

async fn health(State(router): State<AppState>) -> Json<Health> {
    let backends = router
        .backends()
        .into_iter()
        .map(|kind| BackendHealth {
            kind: kind.as_str(),
            remote: router.remote_url(kind).map(str::to_string),
        })
        .collect();
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backends,
    })
}
