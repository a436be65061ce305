//! Filename and timestamp conventions shared by the stores and the engine.
//!
//! Frames are named `image_<YYMMDD_HHMMSS>.jpg` and session artifacts
//! `video_<startTS>_<endTS>.mp4`; the embedded timestamps sort
//! lexicographically in chronological order.

use chrono::{DateTime, Local, NaiveDateTime};

use crate::{Result, VerdacamError};

pub const TIMESTAMP_FORMAT: &str = "%y%m%d_%H%M%S";
pub const IMAGE_PREFIX: &str = "image_";
pub const VIDEO_PREFIX: &str = "video_";
pub const MERGED_PREFIX: &str = "merged_";
pub const IMAGE_EXTENSION: &str = "jpg";
pub const VIDEO_EXTENSION: &str = "mp4";

/// Length of one formatted timestamp (`YYMMDD_HHMMSS`).
const TIMESTAMP_LEN: usize = 13;

pub fn format_timestamp(timestamp: DateTime<Local>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn image_file_name(timestamp: DateTime<Local>) -> String {
    format!(
        "{IMAGE_PREFIX}{}.{IMAGE_EXTENSION}",
        format_timestamp(timestamp)
    )
}

pub fn video_file_name(session_start: DateTime<Local>, session_end: DateTime<Local>) -> String {
    format!(
        "{VIDEO_PREFIX}{}_{}.{VIDEO_EXTENSION}",
        format_timestamp(session_start),
        format_timestamp(session_end)
    )
}

pub fn merged_file_name(first_stem: &str, last_stem: &str) -> String {
    format!("{MERGED_PREFIX}{first_stem}_{last_stem}.{VIDEO_EXTENSION}")
}

/// Start/end pair embedded in a session artifact name, parsed once on
/// load instead of re-splitting strings throughout the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SessionRange {
    /// Parses `video_<startTS>_<endTS>.mp4`; merged or foreign names
    /// yield `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{VIDEO_EXTENSION}"))?;
        let raw = stem.strip_prefix(VIDEO_PREFIX)?;
        if !raw.is_ascii() || raw.len() != TIMESTAMP_LEN * 2 + 1 || raw.as_bytes()[TIMESTAMP_LEN] != b'_' {
            return None;
        }
        let start = NaiveDateTime::parse_from_str(&raw[..TIMESTAMP_LEN], TIMESTAMP_FORMAT).ok()?;
        let end = NaiveDateTime::parse_from_str(&raw[TIMESTAMP_LEN + 1..], TIMESTAMP_FORMAT).ok()?;
        Some(Self { start, end })
    }
}

/// Strict allow-list check applied before any user-supplied name is
/// joined onto a store directory. Rejects traversal outright.
pub fn validate_media_name(name: &str, extension: &str) -> Result<()> {
    let suffix = format!(".{extension}");
    let allowed = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !allowed || !name.ends_with(&suffix) || name.len() <= suffix.len() || name.contains("..") {
        return Err(VerdacamError::InvalidName(name.to_string()));
    }
    Ok(())
}
