//! Batch processing of a directory tree of videos.
//!
//! [`BatchOrchestrator::run`] enumerates the videos under an input root,
//! decides up front which ones are skipped because their sheet already
//! exists or another video claimed the same output path, and pushes the rest
//! through a [`VideoPipeline`] on a fixed-size rayon pool. Every video ends
//! up with exactly one [`Outcome`]; a failure in one video, a panic
//! included, never affects another.
//!
//! Results travel back to the calling thread over a channel. Progress
//! callbacks, preview delivery and the cancellation check all happen there,
//! between completions.

use std::{
    any::Any,
    collections::HashSet,
    fmt,
    fs,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    time::{Duration, Instant},
};

use image::{RgbImage, imageops};

use crate::{
    compositor::GridCompositor,
    configuration::{BatchOptions, CompositionMode, OutputFormat, ProcessingConfig, TargetBox},
    error::ScreenMachineError,
    output::{encode_image, ensure_parent_dir, find_video_files, output_path},
    probe::MetadataProbe,
    progress::{BatchProgress, CancellationToken, NoOpProgress, ProgressTracker},
    runtime::RuntimeContext,
    sampler::{FrameSampler, SampleRequest},
};

/// Largest worker pool a batch will use.
pub const MAX_WORKERS: usize = 16;

/// How often the controller wakes up to check for cancellation while
/// waiting on workers.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Skip reason when the output exists and the tree is mirrored.
pub const REASON_EXISTS: &str = "already exists";
/// Skip reason when the output exists and all sheets share one directory.
pub const REASON_DUPLICATE_NAME: &str = "Duplicate filename (not following structure)";

/// What happened to one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The sheet was written.
    Success,
    /// The video was not processed.
    Skipped { reason: String },
    /// Processing failed; `message` is a short human-readable reason.
    Error { message: String },
}

/// The outcome for one video together with its paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutcome {
    pub video: PathBuf,
    pub output: PathBuf,
    pub outcome: Outcome,
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// One record per finished video, in input order.
    pub outcomes: Vec<VideoOutcome>,
    /// Videos that had no outcome when the batch was cancelled.
    pub unfinished: Vec<PathBuf>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// `true` if the run stopped early.
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Success))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skipped { .. }))
    }

    pub fn errored(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Error { .. }))
    }

    /// Records with an [`Outcome::Error`].
    pub fn errors(&self) -> impl Iterator<Item = &VideoOutcome> {
        self.outcomes
            .iter()
            .filter(|record| matches!(record.outcome, Outcome::Error { .. }))
    }

    /// `Total time: 1m 5s` (or `Total time: 42s` under a minute).
    pub fn total_time_line(&self) -> String {
        format!("Total time: {}", format_elapsed(self.elapsed))
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|record| predicate(&record.outcome))
            .count()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.cancelled { "Stopped" } else { "Complete" };
        write!(
            f,
            "{status}! Processed: {}, Skipped: {}, Errors: {}",
            self.succeeded(),
            self.skipped(),
            self.errored()
        )
    }
}

/// Format a run duration as `Ms Ss`, or `Ss` below a minute.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Scale `sheet` down to fit `max_width × max_height` (never up) with the
/// nearest-neighbour filter.
pub fn fit_preview(sheet: &RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (width, height) = TargetBox::new(max_width, max_height).fit(sheet.width(), sheet.height());
    if (width, height) == sheet.dimensions() {
        return sheet.clone();
    }
    imageops::resize(sheet, width, height, imageops::FilterType::Nearest)
}

/// Receives every finished sheet on the thread that called
/// [`BatchOrchestrator::run`].
pub trait PreviewSink {
    fn show(&mut self, video: &Path, sheet: &RgbImage);
}

/// Turns one video into a finished sheet.
///
/// The orchestrator handles skipping, encoding and outcome bookkeeping; a
/// pipeline only renders.
pub trait VideoPipeline: Send + Sync {
    /// One-time setup before any worker starts.
    ///
    /// # Errors
    ///
    /// An error aborts the batch before any video is touched.
    fn prepare(&self) -> Result<(), ScreenMachineError> {
        Ok(())
    }

    /// Render the sheet for `video`.
    ///
    /// # Errors
    ///
    /// Any error becomes an [`Outcome::Error`] for this video only.
    fn render(&self, video: &Path) -> Result<RgbImage, ScreenMachineError>;
}

/// Probe, sample and compose with the real decoders.
pub struct StandardPipeline {
    context: Arc<RuntimeContext>,
    probe: MetadataProbe,
    sampler: FrameSampler,
    compositor: GridCompositor,
    config: ProcessingConfig,
}

impl StandardPipeline {
    pub fn new(context: Arc<RuntimeContext>, config: ProcessingConfig, options: &BatchOptions) -> Self {
        Self {
            probe: MetadataProbe::new(Arc::clone(&context)),
            sampler: FrameSampler::with_default_strategies(Arc::clone(&context))
                .with_resize_filter(options.resize_filter),
            compositor: GridCompositor::new()
                .with_mode(options.composition_mode)
                .with_resize_filter(options.resize_filter),
            context,
            config,
        }
    }

    /// Replace the sampler, e.g. to change the strategy chain.
    #[must_use]
    pub fn with_sampler(mut self, sampler: FrameSampler) -> Self {
        self.sampler = sampler;
        self
    }

    #[must_use]
    pub fn with_compositor(mut self, compositor: GridCompositor) -> Self {
        self.compositor = compositor;
        self
    }
}

impl VideoPipeline for StandardPipeline {
    fn prepare(&self) -> Result<(), ScreenMachineError> {
        // Resolve (and possibly download) the binaries once, before workers
        // start asking for them. The in-process decoder may still work if
        // this fails.
        if let Err(error) = self.context.decoder_binaries() {
            log::warn!("{error}");
        }
        Ok(())
    }

    fn render(&self, video: &Path) -> Result<RgbImage, ScreenMachineError> {
        let metadata = self.probe.probe(video)?;
        if !metadata.is_processable() {
            return Err(ScreenMachineError::ProbeFailed {
                path: video.to_path_buf(),
                reason: "zero duration or resolution".to_string(),
            });
        }

        let mut request = SampleRequest::new(video, self.config.total_screenshots())
            .with_metadata(metadata.clone());
        request = match self.compositor.mode() {
            CompositionMode::ResizeOnce => request.full_resolution(),
            CompositionMode::ResizeEach => request.with_target_box(self.config.cell_box()),
        };

        let frames = self.sampler.sample_request(&request, None)?;
        Ok(self.compositor.compose(&frames, &self.config, Some(&metadata)))
    }
}

/// Runs a [`VideoPipeline`] over a directory tree.
pub struct BatchOrchestrator {
    config: ProcessingConfig,
    options: BatchOptions,
    pipeline: Arc<dyn VideoPipeline>,
    progress: Arc<dyn BatchProgress>,
    cancellation: CancellationToken,
}

impl BatchOrchestrator {
    /// An orchestrator using [`StandardPipeline`] and a fresh
    /// [`RuntimeContext`].
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::ConfigInvalid`] if `options` are invalid.
    pub fn new(config: ProcessingConfig, options: BatchOptions) -> Result<Self, ScreenMachineError> {
        let context = Arc::new(RuntimeContext::new());
        let pipeline = Arc::new(StandardPipeline::new(context, config.clone(), &options));
        Self::with_pipeline(config, options, pipeline)
    }

    /// An orchestrator with a custom pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::ConfigInvalid`] if `options` are invalid.
    pub fn with_pipeline(
        config: ProcessingConfig,
        options: BatchOptions,
        pipeline: Arc<dyn VideoPipeline>,
    ) -> Result<Self, ScreenMachineError> {
        options.validate()?;
        Ok(Self {
            config,
            options,
            pipeline,
            progress: Arc::new(NoOpProgress),
            cancellation: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A clone of the token that stops this orchestrator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Worker count for `pending` videos: the requested count clamped to
    /// `1..=min(pending, MAX_WORKERS)`.
    pub fn worker_count(&self, pending: usize) -> usize {
        self.options.workers.min(pending).min(MAX_WORKERS).max(1)
    }

    /// Process every video under `input_root`, writing sheets under
    /// `output_root`.
    ///
    /// Per-video failures are recorded in the summary. Once the cancellation
    /// token is raised, no further results are recorded; the call still
    /// waits for videos already in progress to wind down so that no decoder
    /// process outlives it.
    ///
    /// # Errors
    ///
    /// Only setup failures are errors: an unreadable input root, an output
    /// root that cannot be created, a failed [`VideoPipeline::prepare`], or a
    /// worker pool that cannot start.
    pub fn run(
        &self,
        input_root: &Path,
        output_root: &Path,
        mut preview: Option<&mut dyn PreviewSink>,
    ) -> Result<BatchSummary, ScreenMachineError> {
        let start_time = Instant::now();
        let videos = find_video_files(input_root)?;
        fs::create_dir_all(output_root)?;

        let mut tracker = ProgressTracker::new(Arc::clone(&self.progress), videos.len(), start_time);
        let mut slots: Vec<Option<VideoOutcome>> = vec![None; videos.len()];
        let mut pending = Vec::new();

        let mut claimed = HashSet::new();

        for (index, video) in videos.iter().enumerate() {
            let output = output_path(video, input_root, output_root, &self.options);
            let skip = if !claimed.insert(output.clone()) {
                Some(REASON_DUPLICATE_NAME)
            } else if output.exists() && !self.config.overwrite_existing() {
                Some(if self.options.follow_structure {
                    REASON_EXISTS
                } else {
                    REASON_DUPLICATE_NAME
                })
            } else {
                None
            };
            if let Some(reason) = skip {
                log::debug!("Skipping {}: {reason}", video.display());
                slots[index] = Some(VideoOutcome {
                    video: video.clone(),
                    output,
                    outcome: Outcome::Skipped {
                        reason: reason.to_string(),
                    },
                });
                tracker.record_skipped(Some(video.clone()));
            } else {
                pending.push((index, output));
            }
        }

        let mut cancelled = false;
        if !pending.is_empty() && !self.cancellation.is_cancelled() {
            self.pipeline.prepare()?;
            cancelled = self.dispatch(&videos, pending, &mut slots, &mut tracker, &mut preview)?;
        } else if self.cancellation.is_cancelled() {
            cancelled = true;
        }

        let mut summary = BatchSummary {
            cancelled,
            ..BatchSummary::default()
        };
        for (video, slot) in videos.into_iter().zip(slots) {
            match slot {
                Some(record) => summary.outcomes.push(record),
                None => summary.unfinished.push(video),
            }
        }
        summary.elapsed = start_time.elapsed();
        log::info!("{summary}; {}", summary.total_time_line());
        Ok(summary)
    }

    /// Run `pending` on the pool. Returns `true` if cancelled.
    fn dispatch(
        &self,
        videos: &[PathBuf],
        pending: Vec<(usize, PathBuf)>,
        slots: &mut [Option<VideoOutcome>],
        tracker: &mut ProgressTracker,
        preview: &mut Option<&mut dyn PreviewSink>,
    ) -> Result<bool, ScreenMachineError> {
        let workers = self.worker_count(pending.len());
        log::info!("Processing {} videos with {workers} workers", pending.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("screenmachine-worker-{index}"))
            .build()
            .map_err(|error| ScreenMachineError::IoError(std::io::Error::other(error.to_string())))?;

        let want_sheet = preview.is_some();
        let (sender, receiver) = mpsc::channel();
        let mut outstanding = pending.len();
        let mut outputs = vec![PathBuf::new(); slots.len()];

        for (index, output) in pending {
            outputs[index] = output.clone();
            let video = videos[index].clone();
            let sender = sender.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let token = self.cancellation.clone();
            let format = self.options.output_format;
            let quality = self.config.jpg_quality();

            pool.spawn(move || {
                let result = if token.is_cancelled() {
                    Err(ScreenMachineError::Cancelled)
                } else {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        render_and_save(pipeline.as_ref(), &video, &output, format, quality)
                    }))
                    .unwrap_or_else(|payload| Err(ScreenMachineError::WorkerPanicked(panic_message(payload))))
                };
                let sheet = result.map(|sheet| want_sheet.then_some(sheet));
                // The receiver is gone only if the controller panicked.
                let _ = sender.send((index, sheet));
            });
        }
        drop(sender);

        let mut cancelled = false;
        while outstanding > 0 {
            if self.cancellation.is_cancelled() {
                cancelled = true;
                break;
            }
            let (index, result) = match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(message) => message,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            };
            outstanding -= 1;

            let video = videos[index].clone();
            let outcome = match result {
                Ok(sheet) => {
                    if let (Some(sink), Some(sheet)) = (preview.as_deref_mut(), sheet.as_ref()) {
                        sink.show(&video, sheet);
                    }
                    tracker.record_completed(Some(video.clone()));
                    Outcome::Success
                }
                Err(ScreenMachineError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(error) => {
                    log::warn!("{}: {error}", video.display());
                    tracker.record_failed(Some(video.clone()));
                    Outcome::Error {
                        message: error.short_reason(),
                    }
                }
            };
            slots[index] = Some(VideoOutcome {
                video,
                output: std::mem::take(&mut outputs[index]),
                outcome,
            });
        }

        if cancelled {
            self.cancellation.cancel();
            log::warn!("Cancelled; waiting for videos in progress to stop");
            // Queued jobs return at once; running ones are bounded by their
            // decoder timeouts. Their results are discarded.
            for _ in receiver.iter() {}
        }
        Ok(cancelled)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn render_and_save(
    pipeline: &dyn VideoPipeline,
    video: &Path,
    output: &Path,
    format: OutputFormat,
    quality: u8,
) -> Result<RgbImage, ScreenMachineError> {
    let sheet = pipeline.render(video)?;
    ensure_parent_dir(output)?;
    encode_image(&sheet, output, format, quality)?;
    log::debug!("Wrote {}", output.display());
    Ok(sheet)
}
