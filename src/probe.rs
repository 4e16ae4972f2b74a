//! Metadata probing without decoding frames.
//!
//! [`MetadataProbe`] runs `ffprobe` on the first video stream through the
//! scoped subprocess utility, so a hung probe is killed after
//! [`MetadataProbe::DEFAULT_TIMEOUT`] instead of stalling its worker. When the
//! `native` feature is enabled and no `ffprobe` binary can be found, the
//! container header is read in-process instead.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use screenmachine::{MetadataProbe, RuntimeContext};
//!
//! let probe = MetadataProbe::new(Arc::new(RuntimeContext::new()));
//! let metadata = probe.probe("input.mp4")?;
//! println!("{}x{}, {:.1}s", metadata.width, metadata.height, metadata.duration);
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```

use std::{path::Path, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    error::ScreenMachineError,
    metadata::{VideoMetadata, normalize_codec_name},
    process::ScopedProcess,
    runtime::RuntimeContext,
};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<StreamInfo>,
    format: Option<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    codec_name: Option<String>,
}

/// Reads [`VideoMetadata`] for a video file.
#[derive(Debug, Clone)]
pub struct MetadataProbe {
    context: Arc<RuntimeContext>,
    timeout: Duration,
}

impl MetadataProbe {
    /// How long `ffprobe` may run before it is killed.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self {
            context,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe `path`.
    ///
    /// Nothing is synthesized on failure: a video whose metadata cannot be
    /// read is reported as unreadable.
    ///
    /// # Errors
    ///
    /// - [`ScreenMachineError::ProbeTimeout`] if `ffprobe` exceeded the bound.
    /// - [`ScreenMachineError::NoVideoStream`] if the file has no video stream.
    /// - [`ScreenMachineError::ProbeFailed`] if `ffprobe` failed or reported an
    ///   unusable duration or resolution.
    /// - [`ScreenMachineError::DecoderUnavailable`] if no probe is available.
    pub fn probe<P: AsRef<Path>>(&self, path: P) -> Result<VideoMetadata, ScreenMachineError> {
        let path = path.as_ref();
        let file_size = self.context.file_size(path);

        let binaries = match self.context.decoder_binaries() {
            Ok(binaries) => binaries,
            #[cfg(feature = "native")]
            Err(ScreenMachineError::DecoderUnavailable(reason)) => {
                log::info!("{reason}; reading {} in-process", path.display());
                return crate::native::read_metadata(path, file_size);
            }
            Err(error) => return Err(error),
        };

        let output = ScopedProcess::new(&binaries.ffprobe, self.timeout)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,codec_name",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .run()
            .map_err(|error| match error {
                ScreenMachineError::SubprocessTimeout { timeout, .. } => {
                    ScreenMachineError::ProbeTimeout {
                        path: path.to_path_buf(),
                        timeout,
                    }
                }
                other => other,
            })?;

        if !output.success() {
            return Err(ScreenMachineError::ProbeFailed {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(path, &output.stdout, file_size)
    }
}

/// Build [`VideoMetadata`] from `ffprobe -of json` output.
///
/// Duration comes from the container; if the container omits it, it is
/// derived from `nb_frames / fps`.
///
/// # Errors
///
/// Returns [`ScreenMachineError::NoVideoStream`] if the output lists no stream
/// and [`ScreenMachineError::ProbeFailed`] if it does not parse or lacks a
/// positive duration or resolution.
pub fn parse_probe_output(
    path: &Path,
    json: &[u8],
    file_size: u64,
) -> Result<VideoMetadata, ScreenMachineError> {
    let probe_failed = |reason: String| ScreenMachineError::ProbeFailed {
        path: path.to_path_buf(),
        reason,
    };

    let parsed: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|error| probe_failed(format!("unreadable ffprobe output: {error}")))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ScreenMachineError::NoVideoStream {
            path: path.to_path_buf(),
        })?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        _ => return Err(probe_failed("missing resolution".to_string())),
    };

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let duration = parsed
        .format
        .and_then(|format| format.duration)
        .and_then(|duration| duration.trim().parse::<f64>().ok())
        .filter(|duration| *duration > 0.0)
        .or_else(|| {
            let frames = stream.nb_frames.as_deref()?.trim().parse::<f64>().ok()?;
            (frames > 0.0 && fps > 0.0).then(|| frames / fps)
        })
        .ok_or_else(|| probe_failed("unknown duration".to_string()))?;

    Ok(VideoMetadata {
        width,
        height,
        duration,
        fps,
        codec: stream.codec_name.as_deref().and_then(normalize_codec_name),
        file_size,
        filename: file_name_of(path),
    })
}

/// Parse a frame rate such as `"30000/1001"` or `"29.97"`.
///
/// Returns `None` for a zero denominator, a non-positive rate, or text that
/// is not a number.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.trim().split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.trim().parse().ok()?;
            let denominator: f64 = denominator.trim().parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_fraction() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn frame_rate_decimal_and_invalid() {
        assert!((parse_frame_rate("25").unwrap() - 25.0).abs() < 0.01);
        assert!(parse_frame_rate("30/0").is_none());
        assert!(parse_frame_rate("0/0").is_none());
        assert!(parse_frame_rate("n/a").is_none());
    }

    #[test]
    fn parses_container_duration() {
        let json = br#"{
            "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30/1",
                         "codec_name": "h264", "nb_frames": "300"}],
            "format": {"duration": "10.000000"}
        }"#;
        let metadata = parse_probe_output(Path::new("/videos/clip.mp4"), json, 42).unwrap();
        assert_eq!(metadata.resolution(), (1920, 1080));
        assert!((metadata.duration - 10.0).abs() < 1e-9);
        assert_eq!(metadata.codec.as_deref(), Some("H.264"));
        assert_eq!(metadata.filename, "clip.mp4");
        assert_eq!(metadata.file_size, 42);
    }

    #[test]
    fn falls_back_to_frame_count() {
        let json = br#"{
            "streams": [{"width": 640, "height": 360, "r_frame_rate": "25/1", "nb_frames": "250"}],
            "format": {}
        }"#;
        let metadata = parse_probe_output(Path::new("a.mkv"), json, 0).unwrap();
        assert!((metadata.duration - 10.0).abs() < 1e-9);
        assert_eq!(metadata.codec, None);
    }

    #[test]
    fn no_stream_is_reported() {
        let json = br#"{"streams": [], "format": {"duration": "3.0"}}"#;
        let result = parse_probe_output(Path::new("a.mp3"), json, 0);
        assert!(matches!(result, Err(ScreenMachineError::NoVideoStream { .. })));
    }

    #[test]
    fn unknown_duration_fails() {
        let json = br#"{"streams": [{"width": 640, "height": 360}], "format": {}}"#;
        let result = parse_probe_output(Path::new("a.mp4"), json, 0);
        assert!(matches!(result, Err(ScreenMachineError::ProbeFailed { .. })));
    }
}
