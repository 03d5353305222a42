//! Video analysis: worker metadata, formatting, and a URL-keyed cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::downloader::ExtractionWorker;
use crate::error::{Error, Result};
use crate::platform::{self, Platform};

const UNKNOWN_TITLE: &str = "Unknown Title";

/// What the analyze step reports about a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub url: String,
    pub platform: Platform,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_avatar: Option<String>,
    pub available_qualities: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// The subset of yt-dlp's `--dump-json` output we use.
#[derive(Debug, Default, Deserialize)]
struct WorkerInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    uploader: Option<String>,
    channel: Option<String>,
    uploader_avatar: Option<String>,
    #[serde(default)]
    formats: Vec<WorkerFormat>,
}

#[derive(Debug, Deserialize)]
struct WorkerFormat {
    height: Option<u32>,
}

impl VideoMetadata {
    /// Build metadata from the worker's JSON description of `url`.
    pub fn from_worker_json(
        url: impl Into<String>,
        platform: Platform,
        info: serde_json::Value,
    ) -> Result<Self> {
        if !info.is_object() {
            return Err(Error::MalformedMetadata(
                "expected a JSON object".to_string(),
            ));
        }
        let info: WorkerInfo =
            serde_json::from_value(info).map_err(|e| Error::MalformedMetadata(e.to_string()))?;

        let heights = info.formats.iter().filter_map(|f| f.height);

        Ok(Self {
            url: url.into(),
            platform,
            title: non_empty(info.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            thumbnail: non_empty(info.thumbnail),
            duration: info
                .duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| format_duration(d as u64)),
            views: info.view_count.map(format_count),
            channel_name: non_empty(info.uploader).or_else(|| non_empty(info.channel)),
            channel_avatar: non_empty(info.uploader_avatar),
            available_qualities: available_qualities(heights),
            last_updated: Utc::now(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Distinct heights, highest first, rendered as `"{height}p"`.
pub fn available_qualities(heights: impl IntoIterator<Item = u32>) -> Vec<String> {
    let distinct: BTreeSet<u32> = heights.into_iter().filter(|h| *h > 0).collect();
    distinct.into_iter().rev().map(|h| format!("{h}p")).collect()
}

/// `M:SS` below an hour, `H:MM:SS` from an hour on.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Compact view count: `1.2K`, `3.4M`, or the plain number.
pub fn format_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

/// Cache key for a URL: trimmed, without fragment.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Analysis results keyed by normalized URL.
///
/// Entries are never refreshed; a repeat analysis returns the stored value.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<String, VideoMetadata>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<VideoMetadata> {
        self.entries
            .get(&normalize_url(url))
            .map(|entry| entry.value().clone())
    }

    /// Store `metadata` under its URL, replacing any previous entry.
    pub fn insert(&self, metadata: VideoMetadata) {
        self.entries.insert(normalize_url(&metadata.url), metadata);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Analyzes URLs through the worker, memoizing results.
pub struct MetadataService {
    cache: Arc<MetadataCache>,
    worker: Arc<dyn ExtractionWorker>,
}

impl MetadataService {
    pub fn new(cache: Arc<MetadataCache>, worker: Arc<dyn ExtractionWorker>) -> Self {
        Self { cache, worker }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Validate `url` and return its metadata, asking the worker on a miss.
    pub async fn analyze(&self, url: &str) -> Result<VideoMetadata> {
        let platform = platform::detect(url)?;
        let url = url.trim();

        if let Some(cached) = self.cache.get(url) {
            debug!(%url, "Metadata cache hit");
            return Ok(cached);
        }

        let info = self.worker.fetch_metadata(url).await?;
        let metadata = VideoMetadata::from_worker_json(url, platform, info)?;
        info!(
            %platform,
            title = %metadata.title,
            qualities = metadata.available_qualities.len(),
            "Analyzed video"
        );

        self.cache.insert(metadata.clone());
        Ok(metadata)
    }

    /// Cached title for `url`, if it was analyzed before.
    pub fn cached_title(&self, url: &str) -> Option<String> {
        self.cache.get(url).map(|m| m.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(61), "1:01");
        assert_eq!(format_duration(599), "9:59");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3725), "1:02:05");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1.0K");
        assert_eq!(format_count(1_260), "1.3K");
        assert_eq!(format_count(3_400_000), "3.4M");
    }

    #[test]
    fn test_available_qualities_distinct_descending() {
        assert_eq!(
            available_qualities([360, 1080, 720, 720, 0, 144]),
            vec!["1080p", "720p", "360p", "144p"]
        );
        assert!(available_qualities([]).is_empty());
    }

    #[test]
    fn test_from_worker_json() {
        let info = json!({
            "title": "Clip",
            "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg",
            "duration": 212.0,
            "view_count": 1_534_000,
            "uploader": "",
            "channel": "Channel",
            "formats": [{"height": 720}, {"height": null}, {"height": 1080}, {"format_id": "140"}]
        });

        let meta =
            VideoMetadata::from_worker_json("https://youtu.be/abc", Platform::Youtube, info).unwrap();

        assert_eq!(meta.title, "Clip");
        assert_eq!(meta.duration.as_deref(), Some("3:32"));
        assert_eq!(meta.views.as_deref(), Some("1.5M"));
        assert_eq!(meta.channel_name.as_deref(), Some("Channel"));
        assert_eq!(meta.channel_avatar, None);
        assert_eq!(meta.available_qualities, vec!["1080p", "720p"]);
    }

    #[test]
    fn test_from_worker_json_defaults_title() {
        let meta =
            VideoMetadata::from_worker_json("https://youtu.be/abc", Platform::Youtube, json!({}))
                .unwrap();
        assert_eq!(meta.title, UNKNOWN_TITLE);
        assert!(meta.available_qualities.is_empty());
        assert!(meta.duration.is_none());
    }

    #[test]
    fn test_from_worker_json_rejects_non_object() {
        assert!(matches!(
            VideoMetadata::from_worker_json("u", Platform::Youtube, json!([1, 2])),
            Err(Error::MalformedMetadata(_))
        ));
        assert!(matches!(
            VideoMetadata::from_worker_json("u", Platform::Youtube, json!({"duration": "long"})),
            Err(Error::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let meta = VideoMetadata::from_worker_json(
            "https://youtu.be/abc",
            Platform::Youtube,
            json!({"title": "Clip", "uploader": "Someone", "formats": [{"height": 480}]}),
        )
        .unwrap();

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["channelName"], "Someone");
        assert_eq!(value["availableQualities"], json!(["480p"]));
        assert_eq!(value["platform"], "youtube");
        assert!(value.get("thumbnail").is_none());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("  https://youtu.be/abc#t=10 "),
            "https://youtu.be/abc"
        );
        assert_eq!(normalize_url("youtu.be/abc"), "youtu.be/abc");
    }

    #[test]
    fn test_cache_overwrites() {
        let cache = MetadataCache::new();
        let mut meta =
            VideoMetadata::from_worker_json("https://youtu.be/abc", Platform::Youtube, json!({}))
                .unwrap();
        cache.insert(meta.clone());
        meta.title = "Renamed".to_string();
        cache.insert(meta);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("https://youtu.be/abc#x").unwrap().title, "Renamed");
    }
}
