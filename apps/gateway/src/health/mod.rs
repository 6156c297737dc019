//! Health check endpoints

use crate::metrics::GatewayMetrics;
use crate::shard::{ShardPool, ShardStatus, ShardSupervisor};
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
    pub pool_id: u32,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub pool_id: u32,
    pub shards_total: usize,
    pub shards_connected: usize,
}

/// Per-shard snapshot
#[derive(Debug, Serialize)]
pub struct ShardReport {
    pub id: u32,
    pub total_shards: u32,
    pub status: ShardStatus,
    pub ping: i64,
    pub destroyed: bool,
    pub worker: bool,
}

impl From<&ShardSupervisor> for ShardReport {
    fn from(shard: &ShardSupervisor) -> Self {
        Self {
            id: shard.id(),
            total_shards: shard.total_shards(),
            status: shard.status(),
            ping: shard.ping(),
            destroyed: shard.is_destroyed(),
            worker: shard.has_worker(),
        }
    }
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ShardPool>,
    pub metrics: GatewayMetrics,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/shards", get(shards_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        pool_id: state.pool.pool_id(),
    })
}

/// Readiness endpoint - returns 200 if at least one shard is connected
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shards_connected = state.pool.connected_shards();
    let ready = shards_connected > 0;

    let response = ReadyResponse {
        ready,
        pool_id: state.pool.pool_id(),
        shards_total: state.pool.shard_count(),
        shards_connected,
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

async fn shards_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shards: Vec<ShardReport> = state.pool.shards().iter().map(ShardReport::from).collect();
    Json(shards)
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state
        .metrics
        .set_shards_connected(state.pool.pool_id(), state.pool.connected_shards());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
