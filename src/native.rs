//! In-process frame decoding through the FFmpeg libraries.
//!
//! [`NativeDecoder`] opens the container once per request, visits the
//! requested timestamps in ascending order so that seeks only move forward,
//! and takes the first frame decoded after each keyframe seek. A timestamp
//! that fails to seek or decode within [`NativeDecoder::FRAME_DEADLINE`] is
//! skipped. The input context is dropped exactly once when the call returns,
//! whichever path it returns by.

use std::{
    path::Path,
    sync::OnceLock,
    time::{Duration, Instant},
};

use ffmpeg_next::{
    Rational,
    codec::context::Context as CodecContext,
    format::Pixel,
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};
use image::RgbImage;

use crate::{
    error::ScreenMachineError,
    metadata::{VideoMetadata, normalize_codec_name},
    probe::file_name_of,
    sampler::{FrameDecodeStrategy, FrameSample},
};

const AV_TIME_BASE: f64 = 1_000_000.0;

/// Per-timestamp failures logged individually before switching to a count.
const LOGGED_FAILURES: usize = 3;

static INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Initialize the FFmpeg libraries once per process and quiet their console
/// output to errors only. Returns `false` if initialization failed.
pub fn initialize() -> bool {
    *INITIALIZED.get_or_init(|| match ffmpeg_next::init() {
        Ok(()) => {
            ffmpeg_next::util::log::set_level(Level::Error);
            true
        }
        Err(error) => {
            log::warn!("FFmpeg libraries failed to initialize: {error}");
            false
        }
    })
}

/// FFmpeg's own console verbosity, most verbose last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

/// Set what the FFmpeg libraries print to stderr.
///
/// This does not affect messages sent through the `log` crate.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    initialize();
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Decode strategy backed by `ffmpeg-next`.
#[derive(Debug, Clone, Default)]
pub struct NativeDecoder {
    frame_deadline: Option<Duration>,
}

impl NativeDecoder {
    /// Longest time spent looking for a frame after one seek.
    pub const FRAME_DEADLINE: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_frame_deadline(mut self, deadline: Duration) -> Self {
        self.frame_deadline = Some(deadline);
        self
    }

    fn deadline(&self) -> Duration {
        self.frame_deadline.unwrap_or(Self::FRAME_DEADLINE)
    }
}

impl FrameDecodeStrategy for NativeDecoder {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn probe(&self) -> bool {
        initialize()
    }

    fn sample(
        &self,
        video_path: &Path,
        timestamps: &[f64],
        decode_size: Option<(u32, u32)>,
    ) -> Result<Vec<FrameSample>, ScreenMachineError> {
        let mut input = ffmpeg_next::format::input(&video_path).map_err(|error| {
            ScreenMachineError::FileOpen {
                path: video_path.to_path_buf(),
                reason: error.to_string(),
            }
        })?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| ScreenMachineError::NoVideoStream {
                path: video_path.to_path_buf(),
            })?;
        let stream_index = stream.index();
        let decoder_context = CodecContext::from_parameters(stream.parameters())?;
        let mut decoder = decoder_context.decoder().video()?;

        let mut ascending = timestamps.to_vec();
        ascending.sort_by(f64::total_cmp);

        let mut converter = FrameConverter::new(decode_size);
        let mut decoded_frame = VideoFrame::empty();
        let mut samples = Vec::with_capacity(timestamps.len());
        let mut failures = 0usize;

        for timestamp in ascending {
            let target = (timestamp * AV_TIME_BASE) as i64;
            let found = match input.seek(target, ..target) {
                Ok(()) => {
                    decoder.flush();
                    let deadline = Instant::now() + self.deadline();
                    let mut found = None;
                    let mut exhausted = true;
                    for (stream, packet) in input.packets() {
                        if Instant::now() >= deadline {
                            exhausted = false;
                            break;
                        }
                        if stream.index() != stream_index || decoder.send_packet(&packet).is_err()
                        {
                            continue;
                        }
                        if decoder.receive_frame(&mut decoded_frame).is_ok() {
                            found = Some(converter.convert(&decoded_frame));
                            break;
                        }
                    }
                    // Out of packets: frames held back for reordering are
                    // only released by draining.
                    if found.is_none()
                        && exhausted
                        && decoder.send_eof().is_ok()
                        && decoder.receive_frame(&mut decoded_frame).is_ok()
                    {
                        found = Some(converter.convert(&decoded_frame));
                    }
                    found.unwrap_or_else(|| {
                        Err(ScreenMachineError::FfmpegError(
                            "no frame decoded after seek".to_string(),
                        ))
                    })
                }
                Err(error) => Err(error.into()),
            };

            match found {
                Ok(image) => samples.push(FrameSample::new(image, timestamp)),
                Err(error) => {
                    failures += 1;
                    if failures <= LOGGED_FAILURES {
                        log::debug!(
                            "Skipping {timestamp:.2}s of {}: {error}",
                            video_path.display()
                        );
                    }
                }
            }
        }

        if failures > LOGGED_FAILURES {
            log::debug!(
                "{} more timestamps of {} failed to decode",
                failures - LOGGED_FAILURES,
                video_path.display()
            );
        }

        Ok(samples)
    }
}

/// Converts decoded frames to RGB, rebuilding the scaler whenever the source
/// format or size changes mid-stream.
struct FrameConverter {
    output_size: Option<(u32, u32)>,
    scaler: Option<(ScalingContext, (Pixel, u32, u32))>,
    rgb_frame: VideoFrame,
}

impl FrameConverter {
    fn new(output_size: Option<(u32, u32)>) -> Self {
        Self {
            output_size,
            scaler: None,
            rgb_frame: VideoFrame::empty(),
        }
    }

    fn convert(&mut self, frame: &VideoFrame) -> Result<RgbImage, ScreenMachineError> {
        let source = (frame.format(), frame.width(), frame.height());
        let (width, height) = self.output_size.unwrap_or((source.1, source.2));

        let stale = !matches!(&self.scaler, Some((_, key)) if *key == source);
        if stale {
            let context = ScalingContext::get(
                source.0,
                source.1,
                source.2,
                Pixel::RGB24,
                width,
                height,
                ScalingFlags::BILINEAR,
            )?;
            self.scaler = Some((context, source));
        }

        let Some((scaler, _)) = self.scaler.as_mut() else {
            return Err(ScreenMachineError::FfmpegError(
                "scaler unavailable".to_string(),
            ));
        };
        scaler.run(frame, &mut self.rgb_frame)?;

        let buffer = frame_to_rgb_buffer(&self.rgb_frame, width, height);
        RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            ScreenMachineError::FfmpegError("decoded frame has an unexpected size".to_string())
        })
    }
}

/// Copy an RGB24 plane into a tightly packed buffer, dropping row padding.
fn frame_to_rgb_buffer(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = frame.stride(0);
    let row_bytes = (width as usize) * 3;
    let data = frame.data(0);

    if stride == row_bytes {
        return data[..row_bytes * (height as usize)].to_vec();
    }
    let mut buffer = Vec::with_capacity(row_bytes * (height as usize));
    for row in 0..(height as usize) {
        let start = row * stride;
        buffer.extend_from_slice(&data[start..start + row_bytes]);
    }
    buffer
}

fn rational_to_f64(rate: Rational) -> Option<f64> {
    (rate.denominator() != 0 && rate.numerator() > 0)
        .then(|| rate.numerator() as f64 / rate.denominator() as f64)
}

/// Read [`VideoMetadata`] from the container header without `ffprobe`.
///
/// # Errors
///
/// Returns [`ScreenMachineError::FileOpen`] if the file cannot be opened,
/// [`ScreenMachineError::NoVideoStream`] if it has no video, and
/// [`ScreenMachineError::ProbeFailed`] if the duration or size is unknown.
pub(crate) fn read_metadata(
    path: &Path,
    file_size: u64,
) -> Result<VideoMetadata, ScreenMachineError> {
    if !initialize() {
        return Err(ScreenMachineError::DecoderUnavailable(
            "FFmpeg libraries failed to initialize".to_string(),
        ));
    }

    let input = ffmpeg_next::format::input(&path).map_err(|error| ScreenMachineError::FileOpen {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?;
    let stream = input
        .streams()
        .best(Type::Video)
        .ok_or_else(|| ScreenMachineError::NoVideoStream {
            path: path.to_path_buf(),
        })?;

    let decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .video()?;
    let (width, height) = (decoder.width(), decoder.height());
    let fps = rational_to_f64(stream.avg_frame_rate())
        .or_else(|| rational_to_f64(stream.rate()))
        .unwrap_or(0.0);

    let container_duration = input.duration() as f64 / AV_TIME_BASE;
    let stream_duration = rational_to_f64(stream.time_base())
        .map(|base| stream.duration() as f64 * base)
        .unwrap_or(0.0);
    let frame_duration = if fps > 0.0 && stream.frames() > 0 {
        stream.frames() as f64 / fps
    } else {
        0.0
    };
    let duration = [container_duration, stream_duration, frame_duration]
        .into_iter()
        .find(|duration| *duration > 0.0)
        .ok_or_else(|| ScreenMachineError::ProbeFailed {
            path: path.to_path_buf(),
            reason: "unknown duration".to_string(),
        })?;

    if width == 0 || height == 0 {
        return Err(ScreenMachineError::ProbeFailed {
            path: path.to_path_buf(),
            reason: "missing resolution".to_string(),
        });
    }

    Ok(VideoMetadata {
        width,
        height,
        duration,
        fps,
        codec: normalize_codec_name(decoder.id().name()),
        file_size,
        filename: file_name_of(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_conversion() {
        assert_eq!(rational_to_f64(Rational::new(30, 1)), Some(30.0));
        assert_eq!(rational_to_f64(Rational::new(0, 1)), None);
        assert_eq!(rational_to_f64(Rational::new(30, 0)), None);
    }

    #[test]
    fn missing_file_is_open_error() {
        if !initialize() {
            return;
        }
        let result = NativeDecoder::new().sample(Path::new("/no/such/video.mp4"), &[1.0], None);
        assert!(matches!(result, Err(ScreenMachineError::FileOpen { .. })));
    }
}
