//! yt-dlp backed [`ExtractionWorker`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::line_reader::LineReader;
use super::worker::{ExitReport, ExtractionWorker, FetchRequest, OutputTarget, WorkerEvent};
use crate::error::{Error, Result};

const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const CHUNK_SIZE: usize = 64 * 1024;
const STDERR_TAIL_LINES: usize = 20;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings for the yt-dlp worker.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path or name of the yt-dlp binary.
    pub binary_path: String,
    /// Extra arguments appended before the URL.
    pub extra_args: Vec<String>,
    /// Upper bound for a metadata lookup.
    pub metadata_timeout: Duration,
    /// How long a killed process gets to be reaped.
    pub kill_grace: Duration,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            extra_args: Vec::new(),
            metadata_timeout: Duration::from_secs(60),
            kill_grace: Duration::from_secs(5),
        }
    }
}

pub struct YtDlpWorker {
    config: YtDlpConfig,
}

impl YtDlpWorker {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YtDlpConfig {
        &self.config
    }

    /// Ask the binary for its version. `None` if it cannot be run.
    pub async fn version(&self) -> Option<String> {
        let output = process_utils::tokio_command(&self.config.binary_path)
            .arg("--version")
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = ["--dump-json", "--no-playlist", "--no-warnings"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(self.config.extra_args.iter().cloned());
        args.extend(["--".to_string(), url.to_string()]);
        args
    }

    fn media_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = vec!["--newline".to_string(), "--no-playlist".to_string()];

        match &request.target {
            OutputTarget::File { dir } => {
                args.extend([
                    "-f".to_string(),
                    request.quality.format_selector(),
                    "-o".to_string(),
                    dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
                ]);
            }
            OutputTarget::Pipe { .. } => {
                args.extend([
                    "-f".to_string(),
                    request.quality.passthrough_selector(),
                    "-o".to_string(),
                    "-".to_string(),
                ]);
            }
        }

        args.extend(self.config.extra_args.iter().cloned());
        args.extend(["--".to_string(), request.url.clone()]);
        args
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        Error::worker(
            format!("failed to start {}: {e}", self.config.binary_path),
            String::new(),
        )
    }
}

#[async_trait]
impl ExtractionWorker for YtDlpWorker {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch_metadata(&self, url: &str) -> Result<serde_json::Value> {
        let args = self.metadata_args(url);
        debug!(?args, "Fetching metadata");

        let child = process_utils::piped_command(&self.config.binary_path)
            .args(&args)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output =
            match tokio::time::timeout(self.config.metadata_timeout, child.wait_with_output())
                .await
            {
                Ok(output) => output?,
                Err(_) => {
                    return Err(Error::worker(
                        format!(
                            "metadata extraction timed out after {}s",
                            self.config.metadata_timeout.as_secs()
                        ),
                        String::new(),
                    ));
                }
            };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::worker(
                format!("{} exited with {}", self.name(), output.status),
                stderr,
            ));
        }

        let first_line = output
            .stdout
            .split(|b| *b == b'\n')
            .find(|line| !line.iter().all(u8::is_ascii_whitespace))
            .ok_or_else(|| Error::MalformedMetadata("empty output".to_string()))?;

        serde_json::from_slice(first_line).map_err(|e| Error::MalformedMetadata(e.to_string()))
    }

    async fn fetch_media(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<WorkerEvent>,
        cancel: CancellationToken,
    ) -> Result<ExitReport> {
        if let OutputTarget::File { dir } = &request.target {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::io_path("creating output directory", dir, e))?;
        }

        let job_id = request.job_id;
        let args = self.media_args(&request);
        info!(job_id, mode = ?request.target.mode(), "Starting {}", self.name());
        debug!(job_id, ?args, "Worker arguments");

        let mut child = process_utils::piped_command(&self.config.binary_path)
            .args(&args)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("Failed to capture worker stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Other("Failed to capture worker stderr".to_string()))?;

        let mut stderr_task = tokio::spawn(read_stderr(stderr, events.clone()));

        let pumped = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = pump_stdout(stdout, request.target, &events) => result,
        };

        if let Err(e) = pumped {
            debug!(job_id, error = %e, "Stopping worker");
            process_utils::terminate(&mut child, self.config.kill_grace).await;
            stderr_task.abort();
            return Err(e);
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id, "Cancelled while waiting for worker exit");
                process_utils::terminate(&mut child, self.config.kill_grace).await;
                stderr_task.abort();
                return Err(Error::Cancelled);
            }
            status = child.wait() => status?,
        };

        // A grandchild (ffmpeg) can keep stderr open after the worker exits.
        let stderr_tail = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut stderr_task).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(e)) => {
                warn!(job_id, error = %e, "stderr reader failed");
                String::new()
            }
            Err(_) => {
                stderr_task.abort();
                String::new()
            }
        };

        debug!(job_id, code = ?status.code(), "Worker exited");
        Ok(ExitReport {
            code: status.code(),
            stderr_tail,
        })
    }
}

async fn pump_stdout(
    stdout: ChildStdout,
    target: OutputTarget,
    events: &mpsc::Sender<WorkerEvent>,
) -> Result<()> {
    match target {
        OutputTarget::File { .. } => {
            let mut reader = LineReader::new(stdout);
            while let Some(line) = reader.next_line().await? {
                // keep draining so the child never blocks on a full pipe
                let _ = events.send(WorkerEvent::Line(line)).await;
            }
            Ok(())
        }
        OutputTarget::Pipe { sink } => forward_bytes(stdout, &sink, events).await,
    }
}

async fn forward_bytes(
    mut stdout: ChildStdout,
    sink: &mpsc::Sender<Bytes>,
    events: &mpsc::Sender<WorkerEvent>,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    loop {
        buf.reserve(CHUNK_SIZE);
        let n = tokio::select! {
            _ = sink.closed() => return Err(Error::SinkClosed),
            read = stdout.read_buf(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }

        let chunk = buf.split().freeze();
        sink.send(chunk).await.map_err(|_| Error::SinkClosed)?;
        let _ = events.send(WorkerEvent::Forwarded(n)).await;
    }
}

/// Forward stderr lines as events and return the last few non-progress lines.
async fn read_stderr(stderr: ChildStderr, events: mpsc::Sender<WorkerEvent>) -> String {
    let mut reader = LineReader::new(stderr);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if !line.starts_with("[download]") {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }
                let _ = events.send(WorkerEvent::Line(line)).await;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read worker stderr");
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Quality;
    use std::path::PathBuf;

    fn worker() -> YtDlpWorker {
        YtDlpWorker::new(YtDlpConfig {
            extra_args: vec!["--cookies".to_string(), "c.txt".to_string()],
            ..Default::default()
        })
    }

    fn request(target: OutputTarget) -> FetchRequest {
        FetchRequest {
            job_id: 1,
            url: "https://youtu.be/abc".to_string(),
            quality: Quality::MaxHeight(720),
            target,
        }
    }

    #[test]
    fn test_metadata_args() {
        let args = worker().metadata_args("https://youtu.be/abc");
        assert_eq!(
            args,
            vec![
                "--dump-json",
                "--no-playlist",
                "--no-warnings",
                "--cookies",
                "c.txt",
                "--",
                "https://youtu.be/abc"
            ]
        );
    }

    #[test]
    fn test_media_args_buffered() {
        let args = worker().media_args(&request(OutputTarget::File {
            dir: PathBuf::from("downloads"),
        }));

        assert_eq!(args[0], "--newline");
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "best[height<=720]");
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(
            PathBuf::from(&args[o + 1]),
            PathBuf::from("downloads").join("%(title)s.%(ext)s")
        );
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
    }

    #[test]
    fn test_media_args_pipe() {
        let (sink, _rx) = mpsc::channel(1);
        let args = worker().media_args(&request(OutputTarget::Pipe { sink }));

        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "-");
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "best[height<=720][ext=mp4]/best[height<=720]");
        assert!(args.contains(&"--cookies".to_string()));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Write an executable shell script standing in for yt-dlp.
        fn fake_ytdlp(dir: &TempDir, body: &str) -> YtDlpWorker {
            let path = dir.path().join("yt-dlp");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            YtDlpWorker::new(YtDlpConfig {
                binary_path: path.to_string_lossy().into_owned(),
                metadata_timeout: Duration::from_millis(500),
                ..Default::default()
            })
        }

        async fn collect(mut rx: mpsc::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        }

        #[tokio::test]
        async fn test_fetch_metadata_parses_json() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, r#"echo '{"title":"Clip","duration":61}'"#);

            let info = worker.fetch_metadata("https://youtu.be/abc").await.unwrap();
            assert_eq!(info["title"], "Clip");
            assert_eq!(info["duration"], 61);
        }

        #[tokio::test]
        async fn test_fetch_metadata_non_zero_exit_keeps_stderr() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "echo 'ERROR: Video unavailable' >&2\nexit 1");

            match worker.fetch_metadata("https://youtu.be/abc").await {
                Err(Error::Worker { stderr, .. }) => {
                    assert_eq!(stderr, "ERROR: Video unavailable")
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_fetch_metadata_malformed() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "echo 'not json'");

            assert!(matches!(
                worker.fetch_metadata("https://youtu.be/abc").await,
                Err(Error::MalformedMetadata(_))
            ));
        }

        #[tokio::test]
        async fn test_fetch_metadata_times_out() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "exec sleep 30");

            match worker.fetch_metadata("https://youtu.be/abc").await {
                Err(Error::Worker { message, .. }) => assert!(message.contains("timed out")),
                other => panic!("unexpected result: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_fetch_media_file_mode_reports_lines() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(
                &dir,
                "echo '[download] Destination: downloads/Clip.mp4'\n\
                 echo '[download]  50.0% of 1.00MiB'\n\
                 echo 'WARNING: slow' >&2\n\
                 exit 0",
            );
            let (tx, rx) = mpsc::channel(16);
            let out = dir.path().join("out");

            let report = worker
                .fetch_media(
                    request(OutputTarget::File { dir: out.clone() }),
                    tx,
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            let events = collect(rx).await;

            assert!(report.success());
            assert_eq!(report.stderr_tail, "WARNING: slow");
            assert!(out.is_dir());
            assert!(events.contains(&WorkerEvent::Line(
                "[download] Destination: downloads/Clip.mp4".to_string()
            )));
            assert!(events.contains(&WorkerEvent::Line("[download]  50.0% of 1.00MiB".to_string())));
        }

        #[tokio::test]
        async fn test_fetch_media_reports_exit_code() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "echo 'ERROR: network error' >&2\nexit 1");
            let (tx, rx) = mpsc::channel(16);

            let report = worker
                .fetch_media(
                    request(OutputTarget::File {
                        dir: dir.path().to_path_buf(),
                    }),
                    tx,
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            drop(rx);

            assert_eq!(report.code, Some(1));
            assert_eq!(report.stderr_tail, "ERROR: network error");
        }

        #[tokio::test]
        async fn test_fetch_media_pipe_forwards_bytes() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "printf 'abcdef'\necho '[download] 100%' >&2");
            let (events_tx, events_rx) = mpsc::channel(16);
            let (sink, mut body) = mpsc::channel(4);

            let fetch = tokio::spawn(async move {
                worker
                    .fetch_media(
                        request(OutputTarget::Pipe { sink }),
                        events_tx,
                        CancellationToken::new(),
                    )
                    .await
            });

            let mut received = Vec::new();
            while let Some(chunk) = body.recv().await {
                received.extend_from_slice(&chunk);
            }
            let report = fetch.await.unwrap().unwrap();
            let events = collect(events_rx).await;

            assert_eq!(received, b"abcdef");
            assert!(report.success());
            let forwarded: usize = events
                .iter()
                .filter_map(|e| match e {
                    WorkerEvent::Forwarded(n) => Some(*n),
                    _ => None,
                })
                .sum();
            assert_eq!(forwarded, 6);
        }

        #[tokio::test]
        async fn test_fetch_media_sink_closed_kills_worker() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "exec yes");
            let (events_tx, _events_rx) = mpsc::channel(1024);
            let (sink, body) = mpsc::channel(1);
            drop(body);

            let result = tokio::time::timeout(
                Duration::from_secs(10),
                worker.fetch_media(
                    request(OutputTarget::Pipe { sink }),
                    events_tx,
                    CancellationToken::new(),
                ),
            )
            .await
            .unwrap();

            assert!(matches!(result, Err(Error::SinkClosed)));
        }

        #[tokio::test]
        async fn test_fetch_media_cancel_kills_worker() {
            let dir = TempDir::new().unwrap();
            let worker = fake_ytdlp(&dir, "exec sleep 30");
            let (tx, _rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let result = tokio::time::timeout(
                Duration::from_secs(10),
                worker.fetch_media(
                    request(OutputTarget::File {
                        dir: dir.path().to_path_buf(),
                    }),
                    tx,
                    cancel,
                ),
            )
            .await
            .unwrap();

            assert!(matches!(result, Err(Error::Cancelled)));
        }
    }
}
