//! Worker orchestration: running yt-dlp and turning its output into job state.

pub mod line_reader;
pub mod manager;
pub mod progress;
pub mod worker;
pub mod ytdlp;

pub use manager::{CANCELLED_REASON, JobManager, JobManagerConfig, StreamDownload};
pub use progress::{ParseOutcome, ProgressParser};
pub use worker::{ExitReport, ExtractionWorker, FetchRequest, OutputTarget, WorkerEvent};
pub use ytdlp::{YtDlpConfig, YtDlpWorker};
