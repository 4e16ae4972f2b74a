//! Frame sampling at evenly spaced timestamps.
//!
//! [`FrameSampler`] owns an ordered chain of [`FrameDecodeStrategy`]
//! implementations. The first strategy that is available and returns at least
//! one frame wins; if every strategy comes back empty the request fails with
//! [`ScreenMachineError::ExtractionFailed`]. Whatever order a strategy decoded
//! in, the result follows the caller's timestamp order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use screenmachine::{
//!     FrameSampler, MetadataProbe, RuntimeContext, SampleRequest, TargetBox,
//! };
//!
//! let context = Arc::new(RuntimeContext::new());
//! let metadata = MetadataProbe::new(Arc::clone(&context)).probe("input.mp4")?;
//!
//! let sampler = FrameSampler::with_default_strategies(context);
//! let request = SampleRequest::new("input.mp4", 16)
//!     .with_target_box(TargetBox::new(320, 240))
//!     .with_metadata(metadata);
//! let frames = sampler.sample_request(&request, None)?;
//! println!("decoded {} frames", frames.len());
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

use image::{RgbImage, imageops};

use crate::{
    configuration::{ResizeFilter, TargetBox},
    error::ScreenMachineError,
    external::ExternalDecoder,
    metadata::VideoMetadata,
    runtime::RuntimeContext,
};

/// Timestamps for `count` samples spread over `duration` seconds.
///
/// A single sample sits at the midpoint. Otherwise sample `i` is at
/// `duration / (count + 1) * (i + 1)`, which keeps every sample strictly
/// inside `(0, duration)`.
pub fn sample_timestamps(duration: f64, count: u32) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![duration / 2.0],
        _ => {
            let interval = duration / (count as f64 + 1.0);
            (0..count).map(|i| interval * (i as f64 + 1.0)).collect()
        }
    }
}

/// One decoded frame and the timestamp it was requested at.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub image: RgbImage,
    /// Requested position in seconds.
    pub timestamp: f64,
}

impl FrameSample {
    pub fn new(image: RgbImage, timestamp: f64) -> Self {
        Self { image, timestamp }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Everything needed to sample one video.
#[derive(Debug, Clone)]
#[must_use]
pub struct SampleRequest {
    pub video_path: PathBuf,
    /// Number of frames wanted, normally `rows * columns`.
    pub count: u32,
    /// Fit each frame inside this box; `None` keeps full resolution.
    pub target_box: Option<TargetBox>,
    pub known_metadata: Option<VideoMetadata>,
}

impl SampleRequest {
    pub fn new<P: Into<PathBuf>>(video_path: P, count: u32) -> Self {
        Self {
            video_path: video_path.into(),
            count,
            target_box: None,
            known_metadata: None,
        }
    }

    pub fn with_target_box(mut self, target_box: TargetBox) -> Self {
        self.target_box = Some(target_box);
        self
    }

    /// Keep decoded frames at their native size.
    pub fn full_resolution(mut self) -> Self {
        self.target_box = None;
        self
    }

    pub fn with_metadata(mut self, metadata: VideoMetadata) -> Self {
        self.known_metadata = Some(metadata);
        self
    }

    /// The timestamps this request samples.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::ProbeFailed`] if no metadata is attached
    /// or its duration is not positive.
    pub fn timestamps(&self) -> Result<Vec<f64>, ScreenMachineError> {
        match &self.known_metadata {
            Some(metadata) if metadata.duration > 0.0 => {
                Ok(sample_timestamps(metadata.duration, self.count))
            }
            _ => Err(ScreenMachineError::ProbeFailed {
                path: self.video_path.clone(),
                reason: "duration is unknown".to_string(),
            }),
        }
    }
}

/// A way of turning a video and a list of timestamps into frames.
///
/// Implementations skip timestamps they cannot decode instead of failing the
/// whole call, and tag every returned frame with the exact timestamp value it
/// was asked for. Returned frames may be in any order.
pub trait FrameDecodeStrategy: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Whether this strategy can run at all in the current process.
    fn probe(&self) -> bool;

    /// Decode one frame per timestamp.
    ///
    /// `decode_size`, when given, is the size the decoder should scale to.
    /// Strategies may ignore it; the sampler fits frames afterwards anyway.
    ///
    /// # Errors
    ///
    /// An error means nothing usable was produced (e.g. the file could not be
    /// opened). Per-timestamp failures are not errors.
    fn sample(
        &self,
        video_path: &Path,
        timestamps: &[f64],
        decode_size: Option<(u32, u32)>,
    ) -> Result<Vec<FrameSample>, ScreenMachineError>;
}

/// Ordered fallback chain of decode strategies.
pub struct FrameSampler {
    strategies: Vec<Box<dyn FrameDecodeStrategy>>,
    resize_filter: ResizeFilter,
}

impl FrameSampler {
    /// A sampler that tries `strategies` in order.
    pub fn new(strategies: Vec<Box<dyn FrameDecodeStrategy>>) -> Self {
        Self {
            strategies,
            resize_filter: ResizeFilter::default(),
        }
    }

    /// In-process decoding first (with the `native` feature), then the
    /// `ffmpeg` subprocess.
    pub fn with_default_strategies(context: Arc<RuntimeContext>) -> Self {
        let mut strategies: Vec<Box<dyn FrameDecodeStrategy>> = Vec::new();
        #[cfg(feature = "native")]
        strategies.push(Box::new(crate::native::NativeDecoder::new()));
        strategies.push(Box::new(ExternalDecoder::new(context)));
        Self::new(strategies)
    }

    #[must_use]
    pub fn with_resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.resize_filter = filter;
        self
    }

    /// Names of the configured strategies, in fallback order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Sample the timestamps derived from `request`.
    ///
    /// # Errors
    ///
    /// See [`request.timestamps()`](SampleRequest::timestamps) and
    /// [`sample`](FrameSampler::sample).
    pub fn sample_request(
        &self,
        request: &SampleRequest,
        preview: Option<&mut dyn FnMut(&FrameSample)>,
    ) -> Result<Vec<FrameSample>, ScreenMachineError> {
        let timestamps = request.timestamps()?;
        self.sample(
            &request.video_path,
            &timestamps,
            request.target_box,
            request.known_metadata.as_ref(),
            preview,
        )
    }

    /// Decode one frame per timestamp.
    ///
    /// The result is in `timestamps` order. Timestamps that no strategy could
    /// decode are missing from it; that is logged but not an error. With a
    /// `target_box`, frames are scaled down to fit it (never up). `preview`
    /// is called once per frame, in result order.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::ExtractionFailed`] if every strategy was
    /// unavailable, failed, or produced no frames.
    pub fn sample(
        &self,
        video_path: &Path,
        timestamps: &[f64],
        target_box: Option<TargetBox>,
        metadata: Option<&VideoMetadata>,
        mut preview: Option<&mut dyn FnMut(&FrameSample)>,
    ) -> Result<Vec<FrameSample>, ScreenMachineError> {
        if timestamps.is_empty() {
            return Ok(Vec::new());
        }

        let decode_size = target_box.zip(metadata).map(|(target_box, metadata)| {
            target_box.fit(metadata.width, metadata.height)
        });

        let decoded = self
            .decode_with_fallback(video_path, timestamps, decode_size)
            .ok_or_else(|| ScreenMachineError::ExtractionFailed {
                path: video_path.to_path_buf(),
            })?;

        let mut ordered = restore_order(timestamps, decoded);

        if let Some(target_box) = target_box {
            let filter = self.resize_filter.to_filter_type();
            for sample in &mut ordered {
                let (width, height) = sample.dimensions();
                let fitted = target_box.fit(width, height);
                if fitted != (width, height) {
                    sample.image = imageops::resize(&sample.image, fitted.0, fitted.1, filter);
                }
            }
        }

        if let Some(callback) = preview.as_mut() {
            for sample in &ordered {
                callback(sample);
            }
        }

        if ordered.len() < timestamps.len() {
            let partial = ScreenMachineError::PartialExtraction {
                extracted: ordered.len(),
                requested: timestamps.len(),
            };
            log::warn!(
                "{}: {partial} ({} skipped)",
                video_path.display(),
                timestamps.len() - ordered.len()
            );
        }

        Ok(ordered)
    }

    fn decode_with_fallback(
        &self,
        video_path: &Path,
        timestamps: &[f64],
        decode_size: Option<(u32, u32)>,
    ) -> Option<Vec<FrameSample>> {
        for strategy in &self.strategies {
            if !strategy.probe() {
                log::debug!("{} decoder is unavailable", strategy.name());
                continue;
            }
            match strategy.sample(video_path, timestamps, decode_size) {
                Ok(frames) if !frames.is_empty() => {
                    log::debug!(
                        "{} decoder produced {}/{} frames for {}",
                        strategy.name(),
                        frames.len(),
                        timestamps.len(),
                        video_path.display()
                    );
                    return Some(frames);
                }
                Ok(_) => log::info!(
                    "{} decoder produced no frames for {}; falling back",
                    strategy.name(),
                    video_path.display()
                ),
                Err(error) => log::info!(
                    "{} decoder failed for {}: {error}; falling back",
                    strategy.name(),
                    video_path.display()
                ),
            }
        }
        None
    }
}

/// Reorder `decoded` to follow `requested`, joining on the timestamp value.
fn restore_order(requested: &[f64], decoded: Vec<FrameSample>) -> Vec<FrameSample> {
    let mut by_timestamp: HashMap<u64, VecDeque<FrameSample>> = HashMap::new();
    for sample in decoded {
        by_timestamp
            .entry(sample.timestamp.to_bits())
            .or_default()
            .push_back(sample);
    }
    requested
        .iter()
        .filter_map(|timestamp| {
            by_timestamp
                .get_mut(&timestamp.to_bits())
                .and_then(VecDeque::pop_front)
        })
        .collect()
}
