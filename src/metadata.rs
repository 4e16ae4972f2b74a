//! Video metadata and its display formatting.
//!
//! [`VideoMetadata`] is produced once per video by
//! [`MetadataProbe`](crate::MetadataProbe) and then only read: the sampler
//! uses the duration and resolution, the compositor renders the header text
//! from the rest.

use serde::Serialize;

/// Metadata for one video file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[must_use]
pub struct VideoMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Duration in seconds.
    pub duration: f64,
    /// Nominal frames per second (0.0 if the stream does not declare one).
    pub fps: f64,
    /// Display codec name (e.g. `"H.264"`), if the stream named one.
    pub codec: Option<String>,
    /// File size in bytes (0 if unknown).
    pub file_size: u64,
    /// File name without directories.
    pub filename: String,
}

impl VideoMetadata {
    /// `(width, height)`.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// A video can only be sampled with a positive duration and a known
    /// resolution.
    pub fn is_processable(&self) -> bool {
        self.duration > 0.0 && self.width > 0 && self.height > 0
    }
}

/// Map a raw codec identifier to a display name.
///
/// Well-known codecs get their marketing names; anything else is passed
/// through uppercased. Returns `None` for an empty identifier.
pub fn normalize_codec_name(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    let display = match upper.as_str() {
        "H264" | "AVC1" | "AVC" => "H.264",
        "H265" | "HEVC" | "HVC1" | "HEV1" => "H.265",
        "MPEG4" => "MPEG-4",
        "MPEG2" | "MPEG2VIDEO" => "MPEG-2",
        "MPEG1VIDEO" => "MPEG-1",
        "VP8" => "VP8",
        "VP9" => "VP9",
        "AV1" => "AV1",
        _ => return Some(upper),
    };
    Some(display.to_string())
}

/// Format a byte count as `B`/`KB`/`MB`/`GB`/`TB` with one decimal.
pub fn format_file_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// Format a duration as `HH:MM:SS` if it is an hour or longer, else `MM:SS`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Format a frame timestamp as `MM:SS` (minutes are not wrapped at 60).
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
