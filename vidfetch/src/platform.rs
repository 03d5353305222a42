//! Coarse platform classification for submitted URLs.
//!
//! Only the host matters here; the worker does the real URL parsing.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Platforms the service accepts downloads for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    Pinterest,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
            Self::Pinterest => "pinterest",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::Youtube),
            "tiktok" => Ok(Self::Tiktok),
            "instagram" => Ok(Self::Instagram),
            "pinterest" => Ok(Self::Pinterest),
            other => Err(Error::invalid_input(format!("unknown platform '{other}'"))),
        }
    }
}

static YOUTUBE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:[\w-]+\.)*(?:youtube\.com|youtu\.be)(?:[:/?#]|$)").unwrap()
});
static TIKTOK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:[\w-]+\.)*tiktok\.com(?:[:/?#]|$)").unwrap()
});
static INSTAGRAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:[\w-]+\.)*instagram\.com(?:[:/?#]|$)").unwrap()
});
static PINTEREST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:[\w-]+\.)*(?:pinterest\.[a-z.]+|pin\.it)(?:[:/?#]|$)")
        .unwrap()
});

static PLATFORMS: &[(&LazyLock<Regex>, Platform)] = &[
    (&YOUTUBE_REGEX, Platform::Youtube),
    (&TIKTOK_REGEX, Platform::Tiktok),
    (&INSTAGRAM_REGEX, Platform::Instagram),
    (&PINTEREST_REGEX, Platform::Pinterest),
];

/// Classify a URL by host. Returns `None` for anything not in the table.
pub fn classify(url: &str) -> Option<Platform> {
    let url = url.trim();
    PLATFORMS
        .iter()
        .find(|(regex, _)| regex.is_match(url))
        .map(|(_, platform)| *platform)
}

/// Validate a user-supplied URL and return its platform.
///
/// Blank input is `InvalidInput`; an unrecognised host is `UnsupportedPlatform`.
pub fn detect(url: &str) -> Result<Platform> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_input("url is required"));
    }
    classify(trimmed).ok_or_else(|| Error::UnsupportedPlatform(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Platform::Youtube)]
    #[case("https://youtu.be/abc", Platform::Youtube)]
    #[case("https://m.youtube.com/shorts/xyz", Platform::Youtube)]
    #[case("youtube.com/watch?v=1", Platform::Youtube)]
    #[case("https://www.tiktok.com/@user/video/123", Platform::Tiktok)]
    #[case("https://vm.tiktok.com/ZM123/", Platform::Tiktok)]
    #[case("https://www.instagram.com/reel/Cx1/", Platform::Instagram)]
    #[case("https://www.pinterest.com/pin/123/", Platform::Pinterest)]
    #[case("https://pin.it/abc", Platform::Pinterest)]
    #[case("HTTPS://WWW.YOUTUBE.COM/watch?v=1", Platform::Youtube)]
    fn test_classify_known_hosts(#[case] url: &str, #[case] expected: Platform) {
        assert_eq!(classify(url), Some(expected));
    }

    #[rstest]
    #[case("https://vimeo.com/123")]
    #[case("https://notyoutube.com.evil.net/watch")]
    #[case("https://example.com/?u=youtube.com")]
    #[case("ftp://youtube.com/x")]
    fn test_classify_rejects_other_hosts(#[case] url: &str) {
        assert_eq!(classify(url), None);
    }

    #[test]
    fn test_detect_blank_is_invalid_input() {
        assert!(matches!(detect("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_detect_unknown_is_unsupported() {
        assert!(matches!(
            detect("https://vimeo.com/1"),
            Err(Error::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_platform_roundtrip_str() {
        for platform in [
            Platform::Youtube,
            Platform::Tiktok,
            Platform::Instagram,
            Platform::Pinterest,
        ] {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
    }
}
