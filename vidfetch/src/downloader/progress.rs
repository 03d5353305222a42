//! yt-dlp progress line parser.
//!
//! Turns the worker's human-readable output into percentage ticks and
//! remembers the output file it announces. Lines that match nothing are
//! ignored.

use std::sync::LazyLock;

use regex::Regex;

use crate::jobs::DeliveryMode;

static PERCENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").unwrap());
static DESTINATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[^\]]+\]\s+Destination:\s+(.+?)\s*$").unwrap());
static MERGER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[Merger\]\s+Merging formats into\s+"(.+)"\s*$"#).unwrap());
static ALREADY_DOWNLOADED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[^\]]+\]\s+(.+?)\s+has already been downloaded").unwrap());
static TOTAL_SIZE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bof\s+~?\s*(\d+(?:\.\d+)?)\s*((?:[KMGT]i?)?B)\b").unwrap()
});

/// How a finished worker run turned out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The worker succeeded. `output` is the last announced file, if any.
    Succeeded { output: Option<String> },
    /// The worker failed; `reason` is safe to show to users.
    Failed { reason: String },
}

/// Stateful accumulator over one worker run.
#[derive(Debug)]
pub struct ProgressParser {
    require_output: bool,
    output: Option<String>,
    expected_bytes: Option<u64>,
    saw_percentage: bool,
}

impl ProgressParser {
    /// Parser for a run in the given delivery mode.
    ///
    /// Buffered runs must announce an output file to count as successful;
    /// pass-through runs deliver their bytes directly and need not.
    pub fn for_mode(mode: DeliveryMode) -> Self {
        Self {
            require_output: mode == DeliveryMode::Buffered,
            output: None,
            expected_bytes: None,
            saw_percentage: false,
        }
    }

    /// Feed one line. Returns a percentage tick if the line carries one.
    pub fn parse_line(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();

        if let Some(caps) = MERGER_REGEX.captures(line) {
            self.output = Some(caps[1].to_string());
            return None;
        }
        if let Some(caps) = DESTINATION_REGEX.captures(line) {
            self.output = Some(caps[1].to_string());
            return None;
        }
        if let Some(caps) = ALREADY_DOWNLOADED_REGEX.captures(line) {
            self.output = Some(caps[1].to_string());
            return None;
        }

        if let Some(caps) = TOTAL_SIZE_REGEX.captures(line)
            && let Some(bytes) = parse_size(&caps[1], &caps[2])
        {
            self.expected_bytes = Some(bytes);
        }

        let percent = PERCENT_REGEX
            .captures(line)
            .and_then(|caps| caps[1].parse::<f64>().ok())?;
        self.saw_percentage = true;
        Some(percent)
    }

    /// Last output path announced by the worker.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Total size announced by the worker, in bytes.
    pub fn expected_bytes(&self) -> Option<u64> {
        self.expected_bytes
    }

    pub fn saw_percentage(&self) -> bool {
        self.saw_percentage
    }

    /// Decide the outcome once the worker has exited.
    ///
    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn finish(self, exit_code: Option<i32>) -> ParseOutcome {
        match exit_code {
            Some(0) if self.require_output && self.output.is_none() => ParseOutcome::Failed {
                reason: "could not determine output".to_string(),
            },
            Some(0) => ParseOutcome::Succeeded {
                output: self.output,
            },
            Some(code) => ParseOutcome::Failed {
                reason: format!("worker exited with code {code}"),
            },
            None => ParseOutcome::Failed {
                reason: "worker was terminated".to_string(),
            },
        }
    }
}

/// Final path component of a path printed by the worker.
///
/// Both separators are accepted since the worker may run on Windows.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}
