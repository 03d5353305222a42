//! Shared test fixtures: a scripted extraction worker and polling helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vidfetch::downloader::{ExitReport, ExtractionWorker, FetchRequest, OutputTarget, WorkerEvent};
use vidfetch::jobs::JobId;
use vidfetch::{Error, Result};

/// One thing the scripted worker does when it gets to it.
#[derive(Debug, Clone)]
pub enum Step {
    /// Report an output line.
    Line(String),
    /// Push bytes into the pipe sink.
    Chunk(Vec<u8>),
    /// Exit with this code and stderr.
    Exit(Option<i32>, String),
}

/// What `fetch_metadata` answers for a URL.
#[derive(Debug, Clone)]
pub enum MetadataReply {
    Json(Value),
    Fail(String),
    Malformed,
}

/// An [`ExtractionWorker`] driven step by step from the test body.
///
/// Each job reads its steps from a channel created by [`ScriptedWorker::script`].
/// A job without a script exits 0 immediately.
#[derive(Default)]
pub struct ScriptedWorker {
    scripts: Mutex<HashMap<JobId, mpsc::UnboundedReceiver<Step>>>,
    metadata: Mutex<HashMap<String, MetadataReply>>,
    pub metadata_calls: AtomicUsize,
    pub started: AtomicUsize,
    /// Jobs whose worker returned because it was cancelled.
    pub cancelled: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel feeding the steps of `job_id`. Create it before the job starts.
    pub fn script(&self, job_id: JobId) -> mpsc::UnboundedSender<Step> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().insert(job_id, rx);
        tx
    }

    /// Script a job up front with a fixed list of steps.
    pub fn script_steps(&self, job_id: JobId, steps: impl IntoIterator<Item = Step>) {
        let tx = self.script(job_id);
        for step in steps {
            tx.send(step).unwrap();
        }
    }

    pub fn reply_metadata(&self, url: &str, reply: MetadataReply) {
        self.metadata
            .lock()
            .unwrap()
            .insert(url.to_string(), reply);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> Error {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Error::Cancelled
    }
}

#[async_trait]
impl ExtractionWorker for ScriptedWorker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_metadata(&self, url: &str) -> Result<Value> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.metadata.lock().unwrap().get(url).cloned();
        match reply {
            Some(MetadataReply::Json(value)) => Ok(value),
            Some(MetadataReply::Fail(stderr)) => {
                Err(Error::worker("worker exited with code 1", stderr))
            }
            Some(MetadataReply::Malformed) => {
                Err(Error::MalformedMetadata("not json".to_string()))
            }
            None => Err(Error::worker("worker exited with code 1", "ERROR: no such video")),
        }
    }

    async fn fetch_media(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<WorkerEvent>,
        cancel: CancellationToken,
    ) -> Result<ExitReport> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().remove(&request.job_id);
        let Some(mut steps) = script else {
            return Ok(ExitReport {
                code: Some(0),
                stderr_tail: String::new(),
            });
        };
        let sink = match request.target {
            OutputTarget::Pipe { sink } => Some(sink),
            OutputTarget::File { .. } => None,
        };

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => return Err(self.stopped()),
                _ = sink_closed(sink.as_ref()) => return Err(Error::SinkClosed),
                step = steps.recv() => step,
            };

            match step {
                Some(Step::Line(line)) => {
                    let _ = events.send(WorkerEvent::Line(line)).await;
                }
                Some(Step::Chunk(bytes)) => {
                    let Some(sink) = &sink else { continue };
                    let len = bytes.len();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(self.stopped()),
                        sent = sink.send(Bytes::from(bytes)) => {
                            sent.map_err(|_| Error::SinkClosed)?;
                        }
                    }
                    let _ = events.send(WorkerEvent::Forwarded(len)).await;
                }
                Some(Step::Exit(code, stderr)) => {
                    return Ok(ExitReport {
                        code,
                        stderr_tail: stderr,
                    });
                }
                None => {
                    return Ok(ExitReport {
                        code: Some(0),
                        stderr_tail: String::new(),
                    });
                }
            }
        }
    }
}

async fn sink_closed(sink: Option<&mpsc::Sender<Bytes>>) {
    match sink {
        Some(sink) => sink.closed().await,
        None => std::future::pending().await,
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A yt-dlp style progress line.
pub fn progress_line(percent: &str) -> Step {
    Step::Line(format!(
        "[download]  {percent}% of   10.00MiB at    1.00MiB/s ETA 00:05"
    ))
}
