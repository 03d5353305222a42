//! Download job manager.
//!
//! Creates jobs, runs one worker per job on a detached task and folds what
//! the worker reports into the [`JobStore`]. Every job that gets a task ends
//! in a terminal state, whatever the worker does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::progress::{ParseOutcome, ProgressParser, file_name_of};
use super::worker::{ExitReport, ExtractionWorker, FetchRequest, OutputTarget, WorkerEvent};
use crate::error::{Error, Result};
use crate::filename::sanitize_stem;
use crate::jobs::{
    DeliveryMode, Job, JobId, JobSpec, JobStatus, JobStore, Quality, ResultLocator,
};
use crate::platform;

/// Failure reason recorded for cancelled jobs.
pub const CANCELLED_REASON: &str = "cancelled";

/// Highest progress a running job may report when only a clean worker exit
/// can complete it: byte-count estimates and every pass-through job.
const PROGRESS_CEILING: f64 = 99.0;

/// Configuration for the job manager.
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Directory buffered downloads are written to.
    pub output_dir: PathBuf,
    /// Maximum workers running at once. Further jobs wait as pending.
    pub max_concurrent_downloads: usize,
    /// Capacity of the per-job worker event channel.
    pub event_buffer: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            max_concurrent_downloads: 4,
            event_buffer: 256,
        }
    }
}

/// A pass-through download that has been started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDownload {
    pub job_id: JobId,
    /// Name the client should save the bytes under.
    pub filename: String,
    pub content_type: &'static str,
}

pub struct JobManager {
    config: JobManagerConfig,
    store: Arc<JobStore>,
    worker: Arc<dyn ExtractionWorker>,
    /// Cancellation tokens of jobs whose task is still running.
    active: Arc<DashMap<JobId, CancellationToken>>,
    slots: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(
        store: Arc<JobStore>,
        worker: Arc<dyn ExtractionWorker>,
        config: JobManagerConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));
        Self {
            config,
            store,
            worker,
            active: Arc::new(DashMap::new()),
            slots,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Start a buffered download and return its job id immediately.
    pub fn start_download(&self, mut spec: JobSpec) -> Result<JobId> {
        let platform = platform::detect(&spec.url)?;
        spec.url = spec.url.trim().to_string();

        let request_url = spec.url.clone();
        let quality = spec.quality;
        let expected_bytes = spec.expected_bytes;
        let job_id = self.store.insert(spec, platform, DeliveryMode::Buffered);

        self.spawn(
            FetchRequest {
                job_id,
                url: request_url,
                quality,
                target: OutputTarget::File {
                    dir: self.config.output_dir.clone(),
                },
            },
            None,
            expected_bytes,
        );

        info!(job_id, %platform, %quality, "Buffered download started");
        Ok(job_id)
    }

    /// Start a pass-through download whose bytes are sent into `sink`.
    ///
    /// Dropping the receiving side of `sink` stops the worker and fails the
    /// job.
    pub fn stream_download(
        &self,
        mut spec: JobSpec,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<StreamDownload> {
        let platform = platform::detect(&spec.url)?;
        spec.url = spec.url.trim().to_string();

        let request_url = spec.url.clone();
        let quality = spec.quality;
        let expected_bytes = spec.expected_bytes;
        let filename = stream_filename(spec.title.as_deref(), quality);
        let job_id = self.store.insert(spec, platform, DeliveryMode::Stream);

        self.spawn(
            FetchRequest {
                job_id,
                url: request_url,
                quality,
                target: OutputTarget::Pipe { sink },
            },
            Some(filename.clone()),
            expected_bytes,
        );

        info!(job_id, %platform, %quality, %filename, "Pass-through download started");
        Ok(StreamDownload {
            job_id,
            filename,
            content_type: quality.content_type(),
        })
    }

    /// Fail a pending job and stop its worker.
    ///
    /// Returns the job snapshot. Terminal jobs are returned unchanged.
    pub fn cancel(&self, job_id: JobId) -> Result<Job> {
        if self.store.fail(job_id, CANCELLED_REASON)? {
            info!(job_id, "Download cancelled");
            self.stop_worker(job_id);
        }
        self.store.get(job_id)
    }

    pub fn get_status(&self, job_id: JobId) -> Result<Job> {
        self.store.get(job_id)
    }

    /// Poll a job until it is terminal or `timeout` passes, returning the last snapshot.
    pub async fn wait_terminal(&self, job_id: JobId, timeout: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.store.get(job_id)?;
            if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn list_recent(&self, limit: usize) -> Vec<Job> {
        self.store.list_recent(limit)
    }

    /// Delete a job, stopping its worker if it is still running.
    pub fn remove(&self, job_id: JobId) -> Result<Job> {
        let job = self.store.remove(job_id)?;
        self.stop_worker(job_id);
        debug!(job_id, "Job removed");
        Ok(job)
    }

    /// Delete every job and stop the workers of the deleted jobs.
    ///
    /// Jobs started while the clear runs keep their worker.
    pub fn clear_all(&self) -> usize {
        let removed = self.store.clear();
        for &job_id in &removed {
            self.stop_worker(job_id);
        }
        info!(removed = removed.len(), "Cleared download history");
        removed.len()
    }

    /// Number of jobs whose worker task is still running.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel every running job and wait up to `timeout` for them to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        let stopped = self.cancel_active();
        if stopped == 0 {
            return;
        }
        info!(count = stopped, "Stopping running downloads");

        let deadline = tokio::time::Instant::now() + timeout;
        while !self.active.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !self.active.is_empty() {
            warn!(remaining = self.active.len(), "Downloads still running after shutdown timeout");
        }
    }

    fn cancel_active(&self) -> usize {
        let tokens: Vec<CancellationToken> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Signal a job's worker to stop. The entry stays in `active` until the
    /// task has finished.
    fn stop_worker(&self, job_id: JobId) {
        if let Some(token) = self.active.get(&job_id) {
            token.cancel();
        }
    }

    fn spawn(&self, request: FetchRequest, label: Option<String>, expected_bytes: Option<u64>) {
        let cancel = CancellationToken::new();
        self.active.insert(request.job_id, cancel.clone());

        let runner = JobRunner {
            store: self.store.clone(),
            worker: self.worker.clone(),
            active: self.active.clone(),
            slots: self.slots.clone(),
            event_buffer: self.config.event_buffer.max(1),
        };
        tokio::spawn(runner.run(request, label, expected_bytes, cancel));
    }
}

/// What a worker run left behind once both sides of it finished.
struct Fetched {
    report: ExitReport,
    parser: ProgressParser,
    /// Bytes handed to the pass-through sink.
    forwarded: u64,
}

/// Drives one job from worker start to terminal state.
struct JobRunner {
    store: Arc<JobStore>,
    worker: Arc<dyn ExtractionWorker>,
    active: Arc<DashMap<JobId, CancellationToken>>,
    slots: Arc<Semaphore>,
    event_buffer: usize,
}

impl JobRunner {
    async fn run(
        self,
        request: FetchRequest,
        label: Option<String>,
        expected_bytes: Option<u64>,
        cancel: CancellationToken,
    ) {
        let job_id = request.job_id;
        let mode = request.target.mode();

        let outcome = match self.acquire_slot(&cancel).await {
            Some(permit) => {
                let outcome = self.drive(request, expected_bytes, &cancel).await;
                drop(permit);
                outcome
            }
            None => Err(Error::Cancelled),
        };

        self.finalize(job_id, mode, label, outcome);
        self.active.remove(&job_id);
    }

    async fn acquire_slot(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Run the worker and the event consumer side by side.
    ///
    /// The worker drops its event sender on return, so the consumer has seen
    /// every line by the time both finish.
    async fn drive(
        &self,
        request: FetchRequest,
        expected_hint: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let job_id = request.job_id;
        let mode = request.target.mode();
        let mut parser = ProgressParser::for_mode(mode);
        let ceiling = match mode {
            DeliveryMode::Buffered => 100.0,
            DeliveryMode::Stream => PROGRESS_CEILING,
        };
        let (event_tx, mut event_rx) = mpsc::channel(self.event_buffer);

        let fetch = self.worker.fetch_media(request, event_tx, cancel.clone());
        let consume = async {
            let mut forwarded: u64 = 0;
            while let Some(event) = event_rx.recv().await {
                match event {
                    WorkerEvent::Line(line) => {
                        trace!(job_id, %line, "Worker output");
                        if let Some(percent) = parser.parse_line(&line) {
                            self.record_progress(job_id, percent.min(ceiling));
                        }
                    }
                    WorkerEvent::Forwarded(n) => {
                        forwarded += n as u64;
                        if !parser.saw_percentage()
                            && let Some(total) = parser.expected_bytes().or(expected_hint)
                            && total > 0
                        {
                            let estimate =
                                (forwarded as f64 / total as f64 * 100.0).min(PROGRESS_CEILING);
                            self.record_progress(job_id, estimate);
                        }
                    }
                }
            }
            forwarded
        };

        let (result, forwarded) = tokio::join!(fetch, consume);
        result.map(|report| Fetched {
            report,
            parser,
            forwarded,
        })
    }

    fn record_progress(&self, job_id: JobId, percent: f64) {
        match self.store.update_progress(job_id, percent) {
            Ok(job) => trace!(job_id, progress = job.progress, "Progress"),
            Err(e) => debug!(job_id, error = %e, "Progress update dropped"),
        }
    }

    fn finalize(
        &self,
        job_id: JobId,
        mode: DeliveryMode,
        label: Option<String>,
        outcome: Result<Fetched>,
    ) {
        let result = match outcome {
            Ok(Fetched {
                report,
                parser,
                forwarded,
            }) => {
                let file_size = match mode {
                    DeliveryMode::Buffered => parser.expected_bytes(),
                    DeliveryMode::Stream => (forwarded > 0).then_some(forwarded),
                };
                match parser.finish(report.code) {
                    ParseOutcome::Succeeded { output } => {
                        let locator = match (mode, output) {
                            (DeliveryMode::Buffered, Some(path)) => {
                                ResultLocator::File(file_name_of(&path).to_string())
                            }
                            (_, output) => ResultLocator::Label(
                                label
                                    .or_else(|| output.map(|p| file_name_of(&p).to_string()))
                                    .unwrap_or_else(|| "download".to_string()),
                            ),
                        };
                        info!(job_id, artifact = locator.name(), ?file_size, "Download completed");
                        file_size
                            .map_or(Ok(()), |bytes| self.store.set_file_size(job_id, bytes))
                            .and_then(|()| {
                                self.store
                                    .set_terminal(job_id, JobStatus::Completed, Some(locator))
                            })
                    }
                    ParseOutcome::Failed { reason } => {
                        warn!(job_id, %reason, stderr = %report.stderr_tail, "Download failed");
                        self.store.fail(job_id, reason)
                    }
                }
            }
            Err(Error::Cancelled) => {
                debug!(job_id, "Worker stopped by cancellation");
                self.store.fail(job_id, CANCELLED_REASON)
            }
            Err(Error::SinkClosed) => {
                info!(job_id, "Client disconnected during pass-through");
                self.store.fail(job_id, "client disconnected")
            }
            Err(Error::Worker { message, stderr }) => {
                warn!(job_id, %message, %stderr, "Worker error");
                self.store.fail(job_id, message)
            }
            Err(e) => {
                error!(job_id, error = %e, "Download task failed");
                self.store.fail(job_id, "download failed")
            }
        };

        if let Err(e) = result {
            debug!(job_id, error = %e, "Job was removed before it finished");
        }
    }
}

/// Name a pass-through download is delivered under.
fn stream_filename(title: Option<&str>, quality: Quality) -> String {
    let stem = title
        .and_then(sanitize_stem)
        .unwrap_or_else(|| "download".to_string());
    format!("{stem}.{}", quality.file_extension())
}
