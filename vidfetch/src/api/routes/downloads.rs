//! Download job routes.
//!
//! `/download` starts a buffered job the client polls; `/download/stream`
//! answers with the media bytes directly.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    ClearDownloadsResponse, DownloadRequest, DownloadResponse, RecentQuery,
    StartDownloadResponse,
};
use crate::api::server::AppState;
use crate::downloader::JobManager;
use crate::filename::content_disposition;
use crate::jobs::{JobId, JobSpec, JobStatus};

/// Header carrying the job id of a pass-through download.
pub const DOWNLOAD_ID_HEADER: &str = "x-download-id";

/// How long to wait for a pass-through job that sent nothing to record its failure.
const FAILURE_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download", post(start_download))
        .route("/download/stream", post(stream_download))
        .route("/download/{id}", get(get_download).delete(delete_download))
        .route("/download/{id}/cancel", post(cancel_download))
        .route("/downloads", delete(clear_downloads))
        .route("/downloads/recent", get(recent_downloads))
}

fn manager(state: &AppState) -> ApiResult<&JobManager> {
    state
        .job_manager
        .as_deref()
        .ok_or_else(|| ApiError::service_unavailable("Download manager not available"))
}

/// Ids that do not parse can never match a job.
fn parse_id(raw: &str) -> ApiResult<JobId> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::not_found(format!("Download with id '{raw}' not found")))
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<StartDownloadResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let mut spec = request.into_spec()?;
    fill_cached_title(&state, &mut spec);

    let download_id = manager(&state)?.start_download(spec)?;
    Ok(Json(StartDownloadResponse { download_id }))
}

/// Use the title of an earlier analysis when the client sent none.
fn fill_cached_title(state: &AppState, spec: &mut JobSpec) {
    if spec.title.is_none()
        && let Some(metadata) = &state.metadata_service
    {
        spec.title = metadata.cached_title(&spec.url);
    }
}

/// Start a pass-through download and respond with its bytes.
///
/// The response is only committed once the first chunk arrives or the job
/// completes without output, so a worker that fails up front still produces
/// a JSON error. Dropping the response body closes the channel, which stops
/// the worker and fails the job.
async fn stream_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let mut spec = request.into_spec()?;
    fill_cached_title(&state, &mut spec);

    let manager = manager(&state)?;
    let (tx, mut rx) = mpsc::channel::<Bytes>(state.stream_channel_capacity);
    let started = manager.stream_download(spec, tx)?;

    let body = match rx.recv().await {
        Some(first) => {
            let chunks =
                futures::stream::unfold((Some(first), rx), |(pending, mut rx)| async move {
                    let chunk = match pending {
                        Some(chunk) => chunk,
                        None => rx.recv().await?,
                    };
                    Some((Ok::<_, std::io::Error>(chunk), (None, rx)))
                });
            Body::from_stream(chunks)
        }
        None => {
            let job = manager
                .wait_terminal(started.job_id, FAILURE_SETTLE_TIMEOUT)
                .await?;
            if job.status != JobStatus::Completed {
                let reason = job.error.unwrap_or_else(|| "download failed".to_string());
                debug!(job_id = started.job_id, %reason, "Pass-through produced no data");
                return Err(ApiError::extraction_failed(format!("Download failed: {reason}")));
            }
            debug!(job_id = started.job_id, "Pass-through completed without data");
            Body::empty()
        }
    };

    let disposition = HeaderValue::from_str(&content_disposition(&started.filename))
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(started.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (
                header::HeaderName::from_static(DOWNLOAD_ID_HEADER),
                HeaderValue::from(started.job_id),
            ),
        ],
        body,
    )
        .into_response())
}

async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let job = manager(&state)?.get_status(parse_id(&id)?)?;
    Ok(Json(job.into()))
}

async fn delete_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let job = manager(&state)?.remove(parse_id(&id)?)?;
    Ok(Json(job.into()))
}

async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let job = manager(&state)?.cancel(parse_id(&id)?)?;
    Ok(Json(job.into()))
}

async fn recent_downloads(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<DownloadResponse>>> {
    let jobs = manager(&state)?.list_recent(query.limit());
    Ok(Json(jobs.into_iter().map(DownloadResponse::from).collect()))
}

async fn clear_downloads(
    State(state): State<AppState>,
) -> ApiResult<Json<ClearDownloadsResponse>> {
    let removed = manager(&state)?.clear_all();
    Ok(Json(ClearDownloadsResponse { removed }))
}
