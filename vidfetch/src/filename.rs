//! File name helpers for delivered artifacts.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest stem kept for a delivered file, in characters.
const MAX_STEM_CHARS: usize = 150;

/// Turn a media title into a file stem usable on every platform.
///
/// Invalid characters become `_` (runs collapse to one), surrounding spaces
/// and dots are trimmed and the result is capped in length. Returns `None`
/// if nothing usable is left.
pub fn sanitize_stem(title: &str) -> Option<String> {
    let mut stem = String::with_capacity(title.len());
    let mut last_was_replacement = false;

    for c in title.chars().take(MAX_STEM_CHARS) {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                stem.push('_');
                last_was_replacement = true;
            }
        } else {
            stem.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = stem.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Whether `name` names a file directly inside a directory.
///
/// Rejects separators, parent references and control characters so a
/// request can never escape the output directory.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
}

/// `Content-Disposition` value for an attachment.
///
/// Carries an ASCII-only `filename` for old clients and the exact name as an
/// RFC 5987 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("My Video: Part 1/2").as_deref(), Some("My Video_ Part 1_2"));
        assert_eq!(sanitize_stem("  ..Clip..  ").as_deref(), Some("Clip"));
        assert_eq!(sanitize_stem("观看一只青蛙?").as_deref(), Some("观看一只青蛙_"));
    }

    #[test]
    fn test_sanitize_stem_empty() {
        assert_eq!(sanitize_stem(""), None);
        assert_eq!(sanitize_stem(" . "), None);
        assert_eq!(sanitize_stem("???"), None);
    }

    #[test]
    fn test_sanitize_stem_caps_length() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_stem(&long).unwrap().chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn test_plain_file_name() {
        assert!(is_plain_file_name("Clip.mp4"));
        assert!(is_plain_file_name("观看 video.m4a"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("a/b.mp4"));
        assert!(!is_plain_file_name(r"a\b.mp4"));
        assert!(!is_plain_file_name("a\0b"));
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("Clip.mp4"),
            "attachment; filename=\"Clip.mp4\"; filename*=UTF-8''Clip.mp4"
        );

        let value = content_disposition("Café \"live\".mp4");
        assert!(value.starts_with("attachment; filename=\"Caf_ _live_.mp4\";"));
        assert!(value.ends_with("filename*=UTF-8''Caf%C3%A9%20%22live%22.mp4"));
    }
}
