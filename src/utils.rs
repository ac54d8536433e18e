//! Utility functions for string handling, timestamps and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging and error records
//! - JSON error detection for truncated provider replies
//! - Bangkok-local timestamp rendering for the report header
//! - Output path validation

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Bangkok is UTC+7 all year round.
pub const BANGKOK_OFFSET_SECS: i32 = 7 * 3600;

const THAI_MONTHS: [&str; 12] = [
    "ม.ค.", "ก.พ.", "มี.ค.", "เม.ย.", "พ.ค.", "มิ.ย.", "ก.ค.", "ส.ค.", "ก.ย.", "ต.ค.", "พ.ย.",
    "ธ.ค.",
];

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and byte count
/// indicator appended. Cuts on char boundaries, so Thai text is safe.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Collapse whitespace and control characters, then cap at `max` characters.
///
/// Used for error messages that end up in the report, where provider bodies
/// can contain newlines and arbitrarily long JSON.
pub fn sanitize_message(s: &str, max: usize) -> String {
    let collapsed = s
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.chars().take(max).collect()
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Convert a UTC instant to Bangkok time.
pub fn to_bangkok(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    // 7h is always in range for FixedOffset.
    let offset = FixedOffset::east_opt(BANGKOK_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
}

/// Render a Thai-style timestamp, e.g. `15 ต.ค. 2026 08:00 น.`.
pub fn thai_local_stamp(local: &DateTime<FixedOffset>) -> String {
    let month = THAI_MONTHS[local.month0() as usize];
    format!(
        "{} {} {} {:02}:{:02} น.",
        local.day(),
        month,
        local.year(),
        local.hour(),
        local.minute()
    )
}

/// Ensure the directory that will hold `path` exists and is writable.
///
/// Checked before any provider call so a bad output path fails fast.
///
/// # Arguments
///
/// * `path` - The output file; only its parent directory is touched
///
/// # Returns
///
/// `Ok(())` after creating the parent directory if needed and writing and
/// removing a scratch file in it. The output file itself is never created.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let scratch = parent.join("..__write_check__");
    fs::write(&scratch, b"").await?;
    let _ = fs::remove_file(&scratch).await;
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let s = "สุขภาพดี".repeat(10);
        let result = truncate_for_log(&s, 5);
        assert!(result.starts_with("สุขภา"));
    }

    #[test]
    fn test_sanitize_message() {
        let raw = "line one\n\n  line\ttwo\r\n";
        assert_eq!(sanitize_message(raw, 200), "line one line two");
        assert_eq!(sanitize_message(&"x".repeat(500), 200).chars().count(), 200);
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"[{"title": "value"#;
        let err = serde_json::from_str::<serde_json::Value>(json_eof).unwrap_err();
        assert!(looks_truncated(&err));

        let err = serde_json::from_str::<serde_json::Value>("[1,,]").unwrap_err();
        assert!(!looks_truncated(&err));
    }

    #[test]
    fn test_thai_local_stamp() {
        let utc = Utc.with_ymd_and_hms(2026, 10, 15, 1, 0, 0).unwrap();
        let local = to_bangkok(utc);
        assert_eq!(local.hour(), 8);
        assert_eq!(thai_local_stamp(&local), "15 ต.ค. 2026 08:00 น.");
    }

    #[test]
    fn test_bangkok_crosses_midnight() {
        let utc = Utc.with_ymd_and_hms(2026, 1, 31, 20, 30, 0).unwrap();
        let local = to_bangkok(utc);
        assert_eq!(thai_local_stamp(&local), "1 ก.พ. 2026 03:30 น.");
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_creates() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out/data.json");
        ensure_parent_dir(&target).await.unwrap();
        assert!(dir.path().join("nested/out").is_dir());
        assert!(!dir.path().join("nested/out/..__write_check__").exists());
    }
}
