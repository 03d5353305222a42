//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LogFilterResponse, UpdateLogFilterRequest};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/logging/filter", get(get_filter).put(update_filter))
}

async fn get_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilterResponse>> {
    let logging_config = state
        .logging_config
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))?;

    Ok(Json(LogFilterResponse {
        filter: logging_config.get_filter(),
    }))
}

/// Replace the active filter directive, e.g. `vidfetch=debug,tower_http=warn`.
async fn update_filter(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LogFilterResponse>> {
    let logging_config = state
        .logging_config
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))?;

    if request.filter.trim().is_empty() {
        return Err(ApiError::invalid_input("filter must not be empty"));
    }

    logging_config
        .set_filter(request.filter.trim())
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    Ok(Json(LogFilterResponse {
        filter: logging_config.get_filter(),
    }))
}
