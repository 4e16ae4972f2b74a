//! # screenmachine
//!
//! Generate contact sheets from video files: a grid of evenly spaced frames
//! with an optional header of file details, per-frame timestamps and a small
//! watermark.
//!
//! The pipeline for one video is probe → sample → compose → encode:
//!
//! - [`MetadataProbe`] reads duration, resolution, frame rate and codec with
//!   `ffprobe` (or the FFmpeg libraries when `ffprobe` is missing).
//! - [`FrameSampler`] decodes one frame per timestamp, trying each
//!   [`FrameDecodeStrategy`] in turn: in-process decoding through
//!   [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) first, then an
//!   `ffmpeg` subprocess.
//! - [`GridCompositor`] lays the frames out and draws the labels.
//! - [`BatchOrchestrator`] runs all of that over a directory tree on a worker
//!   pool, with skip rules, progress, preview and cancellation.
//!
//! ## Quick Start
//!
//! ### One sheet
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use screenmachine::{
//!     FrameSampler, GridCompositor, MetadataProbe, ProcessingConfig, RuntimeContext,
//!     SampleRequest,
//! };
//!
//! let context = Arc::new(RuntimeContext::new());
//! let config = ProcessingConfig::builder().with_grid(3, 4).build()?;
//!
//! let metadata = MetadataProbe::new(context.clone()).probe("input.mp4")?;
//! let request = SampleRequest::new("input.mp4", config.total_screenshots())
//!     .full_resolution()
//!     .with_metadata(metadata.clone());
//! let frames = FrameSampler::with_default_strategies(context).sample_request(&request, None)?;
//!
//! let sheet = GridCompositor::new().compose(&frames, &config, Some(&metadata));
//! sheet.save("input.jpg")?;
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```
//!
//! ### A directory tree
//!
//! ```no_run
//! use std::path::Path;
//!
//! use screenmachine::{BatchOptions, BatchOrchestrator, OutputFormat, ProcessingConfig};
//!
//! let options = BatchOptions::new()
//!     .with_output_format(OutputFormat::Png)
//!     .with_workers(4);
//! let summary = BatchOrchestrator::new(ProcessingConfig::default(), options)?
//!     .run(Path::new("videos"), Path::new("sheets"), None)?;
//! println!("{summary}");
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `native` | In-process decoding through the FFmpeg libraries (default) |
//! | `download` | Fetch a static FFmpeg build when no `ffmpeg`/`ffprobe` is found |
//! | `full` | Enables all of the above |
//!
//! Without `native`, only the `ffmpeg`/`ffprobe` executables are needed.

pub mod batch;
pub mod binaries;
pub mod compositor;
pub mod configuration;
pub mod error;
pub mod external;
pub mod metadata;
#[cfg(feature = "native")]
pub mod native;
pub mod output;
pub mod probe;
pub mod process;
pub mod progress;
pub mod runtime;
pub mod sampler;
pub mod text;

pub use batch::{
    BatchOrchestrator, BatchSummary, Outcome, PreviewSink, StandardPipeline, VideoOutcome,
    VideoPipeline,
};
pub use binaries::{BinarySearch, BinarySource, DecoderBinaries};
pub use compositor::GridCompositor;
pub use configuration::{
    BatchOptions, CompositionMode, OutputFormat, ProcessingConfig, ProcessingConfigBuilder,
    ResizeFilter, Settings, TargetBox,
};
pub use error::ScreenMachineError;
pub use external::ExternalDecoder;
pub use metadata::VideoMetadata;
#[cfg(feature = "native")]
pub use native::{FfmpegLogLevel, NativeDecoder, set_ffmpeg_log_level};
pub use probe::MetadataProbe;
pub use progress::{BatchProgress, CancellationToken, ProgressInfo};
pub use runtime::RuntimeContext;
pub use sampler::{FrameDecodeStrategy, FrameSample, FrameSampler, SampleRequest, sample_timestamps};
pub use text::TextRenderer;
