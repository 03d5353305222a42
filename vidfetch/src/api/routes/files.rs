//! Buffered artifact download route.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::services::ServeFile;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::filename::{content_disposition, is_plain_file_name};

pub fn router() -> Router<AppState> {
    Router::new().route("/download/file/{filename}", get(get_file))
}

/// Serve a file from the output directory as an attachment.
///
/// Only bare file names are accepted; anything that could leave the output
/// directory is rejected.
async fn get_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    if !is_plain_file_name(&filename) {
        return Err(ApiError::invalid_input("Invalid file name"));
    }

    let manager = state
        .job_manager
        .ok_or_else(|| ApiError::service_unavailable("Download manager not available"))?;

    let path = manager.output_dir().join(&filename);
    if !tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
    {
        return Err(ApiError::not_found("File not found"));
    }

    let req = axum::http::Request::builder()
        .body(axum::body::Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut response = match ServeFile::new(&path).try_call(req).await {
        Ok(response) => response.into_response(),
        Err(e) => return Err(ApiError::internal(format!("Failed to serve file: {}", e))),
    };

    let disposition = HeaderValue::from_str(&content_disposition(&filename))
        .map_err(|e| ApiError::internal(e.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);

    Ok(response)
}
