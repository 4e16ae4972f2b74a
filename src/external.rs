//! Frame decoding through an `ffmpeg` subprocess.
//!
//! [`ExternalDecoder`] spawns one `ffmpeg` per timestamp. The `-ss` argument
//! comes before `-i` so the decoder seeks inside the container instead of
//! decoding from the start, and the single output frame comes back as PNG on
//! stdout. Every invocation goes through [`ScopedProcess`], so a hung decoder
//! is killed with its descendants after [`ExternalDecoder::DEFAULT_TIMEOUT`]
//! and that timestamp is skipped.

use std::{
    ffi::OsString,
    path::Path,
    sync::Arc,
    time::Duration,
};

use image::ImageFormat;

use crate::{
    error::ScreenMachineError,
    process::ScopedProcess,
    runtime::RuntimeContext,
    sampler::{FrameDecodeStrategy, FrameSample},
};

/// Decode strategy that shells out to `ffmpeg`.
#[derive(Debug, Clone)]
pub struct ExternalDecoder {
    context: Arc<RuntimeContext>,
    timeout: Duration,
}

impl ExternalDecoder {
    /// Execution bound for one `ffmpeg` invocation.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

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

    fn decode_one(
        &self,
        ffmpeg: &Path,
        video_path: &Path,
        timestamp: f64,
        decode_size: Option<(u32, u32)>,
    ) -> Result<FrameSample, ScreenMachineError> {
        let output = ScopedProcess::new(ffmpeg, self.timeout)
            .args(frame_arguments(video_path, timestamp, decode_size))
            .run()?
            .into_success("ffmpeg")?;

        if output.stdout.is_empty() {
            return Err(ScreenMachineError::FfmpegError(
                "ffmpeg produced no image".to_string(),
            ));
        }
        let image = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?;
        Ok(FrameSample::new(image.into_rgb8(), timestamp))
    }
}

/// Arguments for grabbing one PNG frame at `timestamp`.
pub fn frame_arguments(
    video_path: &Path,
    timestamp: f64,
    decode_size: Option<(u32, u32)>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-v".into(),
        "error".into(),
        "-ss".into(),
        format!("{timestamp:.3}").into(),
        "-i".into(),
        video_path.as_os_str().to_owned(),
    ];
    if let Some((width, height)) = decode_size {
        args.push("-vf".into());
        args.push(format!("scale={width}:{height}").into());
    }
    args.extend(
        ["-an", "-sn", "-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

impl FrameDecodeStrategy for ExternalDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg subprocess"
    }

    fn probe(&self) -> bool {
        self.context.decoder_binaries().is_ok()
    }

    fn sample(
        &self,
        video_path: &Path,
        timestamps: &[f64],
        decode_size: Option<(u32, u32)>,
    ) -> Result<Vec<FrameSample>, ScreenMachineError> {
        let binaries = self.context.decoder_binaries()?;

        let mut samples = Vec::with_capacity(timestamps.len());
        for &timestamp in timestamps {
            match self.decode_one(&binaries.ffmpeg, video_path, timestamp, decode_size) {
                Ok(sample) => samples.push(sample),
                Err(error) => log::debug!(
                    "ffmpeg could not grab {timestamp:.2}s of {}: {error}",
                    video_path.display()
                ),
            }
        }
        Ok(samples)
    }
}
