//! Extraction worker trait and the values passed across it.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::jobs::{DeliveryMode, JobId, Quality};

/// Where a fetch writes the media.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Write a file named after the title into `dir`.
    File { dir: PathBuf },
    /// Write to stdout and forward each chunk into `sink`.
    Pipe { sink: mpsc::Sender<Bytes> },
}

impl OutputTarget {
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Self::File { .. } => DeliveryMode::Buffered,
            Self::Pipe { .. } => DeliveryMode::Stream,
        }
    }
}

/// One fetch of one job.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: JobId,
    pub url: String,
    pub quality: Quality,
    pub target: OutputTarget,
}

/// Something the worker reported while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A line of human-readable output from stdout or stderr.
    Line(String),
    /// This many bytes were accepted by the sink.
    Forwarded(usize),
}

/// How the worker process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Last lines written to stderr. Never shown to users.
    pub stderr_tail: String,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// External extraction process.
#[async_trait]
pub trait ExtractionWorker: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch structured metadata for a URL without downloading media.
    async fn fetch_metadata(&self, url: &str) -> Result<serde_json::Value>;

    /// Fetch the media described by `request`.
    ///
    /// Output lines and forwarded byte counts are sent on `events`; the
    /// sender is dropped when this returns. If `cancel` fires the process is
    /// killed and [`crate::Error::Cancelled`] returned. If a pipe sink is
    /// closed the process is killed and [`crate::Error::SinkClosed`] returned.
    async fn fetch_media(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<WorkerEvent>,
        cancel: CancellationToken,
    ) -> Result<ExitReport>;
}
