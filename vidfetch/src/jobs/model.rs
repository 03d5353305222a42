//! Job records and the values they are built from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::Platform;

/// Job identifier. Assigned from 1 upwards and never reused.
pub type JobId = u64;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::invalid_input(format!("unknown status '{other}'"))),
        }
    }
}

/// How the bytes of a job reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The worker writes a file in the output directory.
    Buffered,
    /// The worker's stdout is forwarded into the HTTP response.
    Stream,
}

/// Where the finished artifact can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResultLocator {
    /// File name inside the output directory.
    File(String),
    /// Name the artifact was delivered under in pass-through mode.
    Label(String),
}

impl ResultLocator {
    pub fn name(&self) -> &str {
        match self {
            Self::File(name) | Self::Label(name) => name,
        }
    }
}

/// Requested variant: audio only, best available, or a height ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Quality {
    Audio,
    Best,
    MaxHeight(u32),
}

impl Quality {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }

    /// yt-dlp `-f` selector for this quality.
    pub fn format_selector(&self) -> String {
        match self {
            Self::Audio => "bestaudio".to_string(),
            Self::Best => "best".to_string(),
            Self::MaxHeight(height) => format!("best[height<={height}]"),
        }
    }

    /// Selector used when the output is piped to a client.
    ///
    /// Prefers the container named by [`Quality::content_type`] and falls back
    /// to the plain selector when the site does not offer it.
    pub fn passthrough_selector(&self) -> String {
        match self {
            Self::Audio => "bestaudio[ext=m4a]/bestaudio".to_string(),
            Self::Best => "best[ext=mp4]/best".to_string(),
            Self::MaxHeight(height) => {
                format!("best[height<={height}][ext=mp4]/best[height<={height}]")
            }
        }
    }

    pub fn file_extension(&self) -> &'static str {
        if self.is_audio() { "m4a" } else { "mp4" }
    }

    pub fn content_type(&self) -> &'static str {
        if self.is_audio() {
            "audio/mp4"
        } else {
            "video/mp4"
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Best => f.write_str("best"),
            Self::MaxHeight(height) => write!(f, "{height}p"),
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "audio" => return Ok(Self::Audio),
            "best" => return Ok(Self::Best),
            _ => {}
        }

        s.strip_suffix(['p', 'P'])
            .and_then(|digits| digits.parse::<u32>().ok())
            .filter(|height| *height > 0)
            .map(Self::MaxHeight)
            .ok_or_else(|| Error::invalid_input(format!("invalid quality '{s}'")))
    }
}

impl TryFrom<String> for Quality {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Quality> for String {
    fn from(value: Quality) -> Self {
        value.to_string()
    }
}

/// What a caller asks for when starting a download.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub url: String,
    pub quality: Quality,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<String>,
    /// Size hint in bytes, used for progress estimates in pass-through mode.
    pub expected_bytes: Option<u64>,
}

impl JobSpec {
    pub fn new(url: impl Into<String>, quality: Quality) -> Self {
        Self {
            url: url.into(),
            quality,
            title: None,
            thumbnail: None,
            duration: None,
            expected_bytes: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn with_expected_bytes(mut self, bytes: u64) -> Self {
        self.expected_bytes = Some(bytes);
        self
    }
}

/// A download job as stored and reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub platform: Platform,
    pub requested_quality: Quality,
    pub mode: DeliveryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_locator: Option<ResultLocator>,
    /// Size in bytes of the finished artifact, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        spec: JobSpec,
        platform: Platform,
        mode: DeliveryMode,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_url: spec.url,
            platform,
            requested_quality: spec.quality,
            mode,
            title: spec.title,
            thumbnail: spec.thumbnail,
            duration: spec.duration,
            status: JobStatus::Pending,
            progress: 0,
            result_locator: None,
            file_size: None,
            error: None,
            created_at,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
