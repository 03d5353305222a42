//! Video analysis route.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::AnalyzeRequest;
use crate::api::server::AppState;
use crate::metadata::VideoMetadata;

pub fn router() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze))
}

/// Extract metadata for a URL, answering from the cache when possible.
async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_input(e.body_text()))?;

    let url = request
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::invalid_input("URL is required"))?;

    let service = state
        .metadata_service
        .ok_or_else(|| ApiError::service_unavailable("Metadata service not available"))?;

    let metadata = service.analyze(&url).await?;
    Ok(Json(metadata))
}
