//! Runtime configuration from environment variables.
//!
//! Every setting has a default; `.env` files are loaded by `main` before this
//! runs. Unparsable values are ignored with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::api::server::ApiServerConfig;
use crate::downloader::{JobManagerConfig, YtDlpConfig};

pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_OUTPUT_DIR: &str = "./downloads";

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiServerConfig,
    pub log_dir: PathBuf,
    pub manager: JobManagerConfig,
    pub worker: YtDlpConfig,
    /// Chunks buffered between the worker and a pass-through response.
    pub stream_channel_capacity: usize,
    /// How long shutdown waits for running downloads to stop.
    pub shutdown_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiServerConfig::default(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            manager: JobManagerConfig {
                output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
                ..Default::default()
            },
            worker: YtDlpConfig::default(),
            stream_channel_capacity: 32,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(&lookup);
        let mut config = Self::default();

        config.api = ApiServerConfig::from_lookup(&lookup);

        if let Some(dir) = env.string("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.string("OUTPUT_DIR") {
            config.manager.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = env.parse::<usize>("MAX_CONCURRENT_DOWNLOADS").filter(|n| *n > 0) {
            config.manager.max_concurrent_downloads = n;
        }

        if let Some(path) = env.string("YTDLP_PATH") {
            config.worker.binary_path = path;
        }
        if let Some(args) = env.string("YTDLP_EXTRA_ARGS") {
            config.worker.extra_args = args.split_whitespace().map(String::from).collect();
        }
        if let Some(secs) = env.parse::<u64>("METADATA_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.worker.metadata_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = env.parse::<usize>("STREAM_CHANNEL_CAPACITY").filter(|n| *n > 0) {
            config.stream_channel_capacity = n;
        }

        config
    }
}

/// Log directory, read on its own so logging can start before the rest.
pub fn log_dir_from_env() -> PathBuf {
    std::env::var("LOG_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "Ignoring invalid configuration value");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.api.bind_address, "0.0.0.0");
        assert_eq!(config.api.port, 5000);
        assert!(config.api.enable_cors);
        assert_eq!(config.manager.output_dir, PathBuf::from("./downloads"));
        assert_eq!(config.worker.binary_path, "yt-dlp");
        assert!(config.worker.extra_args.is_empty());
        assert_eq!(config.worker.metadata_timeout, Duration::from_secs(60));
        assert_eq!(config.stream_channel_capacity, 32);
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("API_PORT", "8080"),
            ("API_ENABLE_CORS", "false"),
            ("OUTPUT_DIR", "/srv/media"),
            ("YTDLP_PATH", "/usr/local/bin/yt-dlp"),
            ("YTDLP_EXTRA_ARGS", "--cookies  /etc/cookies.txt --force-ipv4"),
            ("METADATA_TIMEOUT_SECS", "15"),
            ("STREAM_CHANNEL_CAPACITY", "8"),
            ("MAX_CONCURRENT_DOWNLOADS", "2"),
        ]));

        assert_eq!(config.api.port, 8080);
        assert!(!config.api.enable_cors);
        assert_eq!(config.manager.output_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.manager.max_concurrent_downloads, 2);
        assert_eq!(config.worker.binary_path, "/usr/local/bin/yt-dlp");
        assert_eq!(
            config.worker.extra_args,
            vec!["--cookies", "/etc/cookies.txt", "--force-ipv4"]
        );
        assert_eq!(config.worker.metadata_timeout, Duration::from_secs(15));
        assert_eq!(config.stream_channel_capacity, 8);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            ("API_PORT", "eighty"),
            ("METADATA_TIMEOUT_SECS", "0"),
            ("STREAM_CHANNEL_CAPACITY", "-4"),
        ]));

        assert_eq!(config.api.port, 5000);
        assert_eq!(config.worker.metadata_timeout, Duration::from_secs(60));
        assert_eq!(config.stream_channel_capacity, 32);
    }
}
