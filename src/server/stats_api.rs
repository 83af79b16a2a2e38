//! Read-only HTTP view of a running swapper.
//!
//! - GET /health
//! - GET /metrics (Prometheus text format)
//! - GET /v1/swap/stats

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::metrics::{SwapMetrics, SwapStats};
use crate::workload::WorkloadReport;

/// Application state shared across handlers.
pub struct AppState {
    pub metrics: SwapMetrics,
    pub run_id: Uuid,
    pub start_time: Instant,
    /// Set once the workload finishes.
    pub report: RwLock<Option<WorkloadReport>>,
}

impl AppState {
    pub fn new(metrics: SwapMetrics) -> Self {
        Self {
            metrics,
            run_id: Uuid::new_v4(),
            start_time: Instant::now(),
            report: RwLock::new(None),
        }
    }
}

/// Build the axum router with all stats routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/swap/stats", get(swap_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub run_id: Uuid,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct SwapStatsResponse {
    pub run_id: Uuid,
    pub uptime_secs: u64,
    pub hit_rate: f64,
    pub stats: SwapStats,
    pub workload: Option<WorkloadReport>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        run_id: state.run_id,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn swap_stats(State(state): State<Arc<AppState>>) -> Json<SwapStatsResponse> {
    let stats = state.metrics.snapshot();
    let workload = state.report.read().await.clone();
    Json(SwapStatsResponse {
        run_id: state.run_id,
        uptime_secs: state.start_time.elapsed().as_secs(),
        hit_rate: stats.hit_rate(),
        stats,
        workload,
    })
}
