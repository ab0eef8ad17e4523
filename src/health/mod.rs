//! Health check endpoints
//!
//! Also mounts the WebSocket transport, so one listener serves health checks,
//! metrics scrapes and connected processes.

use crate::container::ShardContainer;
use crate::metrics::HostMetrics;
use crate::transport::ws;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub shards_total: usize,
    pub shards_ready: usize,
    pub shards_failed: Vec<String>,
    pub sessions: usize,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub container: Arc<ShardContainer>,
    pub metrics: Arc<HostMetrics>,
}

/// Create the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws::websocket_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness endpoint - returns 200 only when every shard is Ready
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = ready_response(&state.container);
    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

fn ready_response(container: &ShardContainer) -> ReadyResponse {
    let table = container.table();
    ReadyResponse {
        ready: table.is_ready(),
        shards_total: table.shard_count(),
        shards_ready: table.ready_shards(),
        shards_failed: table.failed().into_iter().map(|(id, _)| id).collect(),
        sessions: container.sessions().count(),
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state
        .metrics
        .set_shards_ready(state.container.table().ready_shards());
    state.metrics.set_sessions(state.container.sessions().count());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
