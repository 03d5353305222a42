//! Request and response bodies.
//!
//! Field names are camelCase to match the web client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::jobs::{DeliveryMode, Job, JobId, JobSpec, JobStatus, Quality, ResultLocator};
use crate::platform::Platform;

/// Default number of entries in the recent downloads list.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Body of `POST /api/analyze`.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of `POST /api/download` and `POST /api/download/stream`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    /// Approximate size in bytes, if the client knows it.
    #[serde(default)]
    pub expected_bytes: Option<u64>,
}

impl DownloadRequest {
    /// Validate required fields and build a job spec.
    pub fn into_spec(self) -> Result<JobSpec, ApiError> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ApiError::invalid_input("url is required"))?;
        let quality: Quality = self
            .quality
            .ok_or_else(|| ApiError::invalid_input("quality is required"))?
            .parse()?;

        let mut spec = JobSpec::new(url, quality);
        spec.title = self.title.filter(|t| !t.trim().is_empty());
        spec.thumbnail = self.thumbnail.filter(|t| !t.is_empty());
        spec.duration = self.duration.filter(|d| !d.is_empty());
        spec.expected_bytes = self.expected_bytes.filter(|b| *b > 0);
        Ok(spec)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDownloadResponse {
    pub download_id: JobId,
}

/// A job as shown to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub id: JobId,
    pub url: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub quality: Quality,
    pub mode: DeliveryMode,
    pub status: JobStatus,
    pub progress: u8,
    /// Name of the delivered artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Where a buffered artifact can be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Artifact size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for DownloadResponse {
    fn from(job: Job) -> Self {
        let download_url = match &job.result_locator {
            Some(ResultLocator::File(name)) => Some(file_url(name)),
            _ => None,
        };

        Self {
            id: job.id,
            url: job.source_url,
            platform: job.platform,
            title: job.title,
            thumbnail: job.thumbnail,
            duration: job.duration,
            quality: job.requested_quality,
            mode: job.mode,
            status: job.status,
            progress: job.progress,
            file_name: job.result_locator.map(|l| l.name().to_string()),
            download_url,
            file_size: job.file_size,
            error: job.error,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

/// Path of the file endpoint for a buffered artifact.
pub fn file_url(name: &str) -> String {
    format!("/api/download/file/{}", urlencoding::encode(name))
}

/// Query of `GET /api/downloads/recent`.
///
/// `limit` is taken as a string so that junk falls back to the default
/// instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub limit: Option<String>,
}

impl RecentQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_RECENT_LIMIT)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearDownloadsResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_downloads: usize,
    pub tracked_downloads: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct LogFilterResponse {
    pub filter: String,
}
