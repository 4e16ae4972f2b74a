//! Error types for the `screenmachine` crate.
//!
//! This module defines [`ScreenMachineError`], the unified error type returned
//! by every fallible operation in the crate. Variants carry the path, timestamp
//! or upstream message needed to diagnose a failure, and
//! [`short_reason`](ScreenMachineError::short_reason) condenses them into the
//! one-line text shown in batch summaries.

use std::{io::Error as IoError, path::PathBuf, time::Duration};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all `screenmachine` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScreenMachineError {
    /// A configuration value was rejected at construction time.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The file does not contain a video stream.
    #[error("No video stream found in {path}")]
    NoVideoStream {
        /// The probed file.
        path: PathBuf,
    },

    /// The metadata probe did not finish within its time bound.
    #[error("Timed out probing {path} after {timeout:?}")]
    ProbeTimeout {
        /// The probed file.
        path: PathBuf,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The metadata probe ran but its result was unusable.
    #[error("Failed to probe {path}: {reason}")]
    ProbeFailed {
        /// The probed file.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Neither decode strategy produced a single usable frame.
    #[error("Could not extract screenshots from {path}")]
    ExtractionFailed {
        /// The video that yielded no frames.
        path: PathBuf,
    },

    /// Fewer frames than requested were decoded. Not fatal: the grid is padded.
    #[error("Only extracted {extracted}/{requested} frames")]
    PartialExtraction {
        /// Frames actually decoded.
        extracted: usize,
        /// Frames requested.
        requested: usize,
    },

    /// The composed image could not be written.
    #[error("Failed to encode {path}: {reason}")]
    EncodeFailed {
        /// Destination path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// A decode strategy cannot run in this process.
    #[error("Decoder unavailable: {0}")]
    DecoderUnavailable(String),

    /// A child process exceeded its execution bound and was killed.
    #[error("{program} did not finish within {timeout:?}")]
    SubprocessTimeout {
        /// Program name as spawned.
        program: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// A child process exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    SubprocessFailed {
        /// Program name as spawned.
        program: String,
        /// Rendered exit status.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// The media file could not be opened by the in-process decoder.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// Fetching the decoder binaries failed.
    #[error("Failed to download decoder binaries: {0}")]
    DownloadFailed(String),

    /// Rendering a video panicked. The payload message, if it was a string.
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl ScreenMachineError {
    /// A short human-readable reason suitable for a batch summary line.
    ///
    /// Internal details (paths, upstream messages) are dropped; use the
    /// [`Display`](std::fmt::Display) form for logs.
    pub fn short_reason(&self) -> String {
        match self {
            ScreenMachineError::ConfigInvalid(message) => message.clone(),
            ScreenMachineError::NoVideoStream { .. }
            | ScreenMachineError::ProbeFailed { .. } => "Could not read metadata".to_string(),
            ScreenMachineError::ProbeTimeout { .. } => {
                "Could not read metadata (timed out)".to_string()
            }
            ScreenMachineError::ExtractionFailed { .. }
            | ScreenMachineError::PartialExtraction { .. } => {
                "Could not extract screenshots".to_string()
            }
            ScreenMachineError::EncodeFailed { .. } | ScreenMachineError::ImageError(_) => {
                "Could not write image".to_string()
            }
            ScreenMachineError::DecoderUnavailable(_)
            | ScreenMachineError::DownloadFailed(_) => "FFmpeg is not available".to_string(),
            ScreenMachineError::Cancelled => "Cancelled".to_string(),
            ScreenMachineError::WorkerPanicked(_) => "Unexpected internal failure".to_string(),
            ScreenMachineError::IoError(error) => format!("I/O error ({})", error.kind()),
            ScreenMachineError::SubprocessTimeout { .. }
            | ScreenMachineError::SubprocessFailed { .. }
            | ScreenMachineError::FileOpen { .. }
            | ScreenMachineError::FfmpegError(_) => "Decoder failure".to_string(),
        }
    }
}

#[cfg(feature = "native")]
impl From<ffmpeg_next::Error> for ScreenMachineError {
    fn from(error: ffmpeg_next::Error) -> Self {
        ScreenMachineError::FfmpegError(error.to_string())
    }
}
