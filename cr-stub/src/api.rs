//! HTTP API of the stub service.
//!
//! Provides:
//! - `/v1` - Health probe, answered by both roles
//! - `/v1/build/{id}` - Build status from fixtures (coordinator)
//! - `/v1/queue` - Queued builds from fixtures (coordinator)
//!
//! When a secret is configured every request must carry a matching
//! `Clusterrunner-Message-Authentication-Digest` header.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use cr_harness::{DIGEST_HEADER, message_digest};
use secrecy::SecretString;
use serde_json::json;
use tracing::{debug, warn};

use crate::fixtures::Fixtures;

/// Shared state for HTTP handlers.
pub struct StubState {
    pub role: &'static str,
    pub fixtures: Fixtures,
    pub secret: Option<SecretString>,
    pub started_at: Instant,
}

pub fn create_router(state: StubState) -> Router {
    Router::new()
        .route("/v1", get(root_handler))
        .route("/v1/build/{build_id}", get(build_handler))
        .route("/v1/queue", get(queue_handler))
        .with_state(Arc::new(state))
}

/// Reject requests whose digest does not match the body (always empty for
/// these GET endpoints).
fn check_digest(state: &StubState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(secret) = &state.secret else {
        return Ok(());
    };
    let expected = message_digest(secret, b"").map_err(|e| {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
    })?;
    let provided = headers.get(DIGEST_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        warn!("Rejecting request with missing or bad digest");
        Err((StatusCode::FORBIDDEN, Json(json!({"error": "bad message digest"}))).into_response())
    }
}

async fn root_handler(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = check_digest(&state, &headers) {
        return rejection;
    }
    Json(json!({
        "role": state.role,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

async fn build_handler(
    State(state): State<Arc<StubState>>,
    Path(build_id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = check_digest(&state, &headers) {
        return rejection;
    }
    debug!(build_id, "Build status requested");
    match state.fixtures.build_status(build_id) {
        Some(build) => Json(json!({ "build": build })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("build {build_id} not found")})),
        )
            .into_response(),
    }
}

async fn queue_handler(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = check_digest(&state, &headers) {
        return rejection;
    }
    Json(json!({ "queue": state.fixtures.queue })).into_response()
}
