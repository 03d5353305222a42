//! Health check route.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::HealthResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness, uptime and job counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (active_downloads, tracked_downloads) = state
        .job_manager
        .as_ref()
        .map(|m| (m.active_count(), m.store().len()))
        .unwrap_or_default();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_downloads,
        tracked_downloads,
    })
}
