//! BatchOrchestrator tests with in-memory pipelines.
//!
//! Videos are empty files with video extensions; the pipelines never read
//! them, so no FFmpeg is needed.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use image::{Rgb, RgbImage};
use screenmachine::{
    BatchOptions, BatchOrchestrator, BatchProgress, CancellationToken, Outcome, OutputFormat,
    PreviewSink, ProcessingConfig, ProgressInfo, ScreenMachineError, VideoPipeline,
    batch::{REASON_DUPLICATE_NAME, REASON_EXISTS},
};

/// Renders a small solid image, failing for file names listed in `fail`
/// and panicking for those in `panic`.
#[derive(Default)]
struct FakePipeline {
    rendered: Mutex<Vec<PathBuf>>,
    fail: Vec<&'static str>,
    panic: Vec<&'static str>,
    delay: Duration,
}

impl FakePipeline {
    fn failing(fail: Vec<&'static str>) -> Self {
        Self {
            fail,
            ..Self::default()
        }
    }

    fn panicking(panic: Vec<&'static str>) -> Self {
        Self {
            panic,
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn rendered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rendered
            .lock()
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

impl VideoPipeline for FakePipeline {
    fn render(&self, video: &Path) -> Result<RgbImage, ScreenMachineError> {
        self.rendered.lock().unwrap().push(video.to_path_buf());
        thread::sleep(self.delay);
        let name = video.file_name().unwrap().to_string_lossy();
        if self.fail.iter().any(|fail| *fail == name) {
            return Err(ScreenMachineError::ExtractionFailed {
                path: video.to_path_buf(),
            });
        }
        if self.panic.iter().any(|panic| *panic == name) {
            panic!("decoder state corrupted by {name}");
        }
        Ok(RgbImage::from_pixel(32, 18, Rgb([40, 120, 200])))
    }
}

fn touch(root: &Path, relative: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"").unwrap();
    path
}

fn orchestrator(options: BatchOptions, pipeline: Arc<FakePipeline>) -> BatchOrchestrator {
    BatchOrchestrator::with_pipeline(ProcessingConfig::default(), options, pipeline).unwrap()
}

// ── Skipping ────────────────────────────────────────────────────────

#[test]
fn existing_output_is_skipped_without_rendering() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "a.mp4");
    touch(input.path(), "b.mkv");
    touch(output.path(), "a.jpg");

    let pipeline = Arc::new(FakePipeline::default());
    let summary = orchestrator(BatchOptions::new(), pipeline.clone())
        .run(input.path(), output.path(), None)
        .unwrap();

    assert_eq!(pipeline.rendered_names(), vec!["b.mkv"]);
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.skipped(), 1);
    assert_eq!(
        summary.outcomes[0].outcome,
        Outcome::Skipped {
            reason: REASON_EXISTS.to_string()
        }
    );
}

#[test]
fn flat_layout_reports_duplicate_names() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "one/clip.mp4");
    touch(input.path(), "two/clip.mp4");

    let pipeline = Arc::new(FakePipeline::default());
    let options = BatchOptions::new().with_follow_structure(false).with_workers(2);
    let orchestrator = orchestrator(options, pipeline.clone());
    let duplicate = Outcome::Skipped {
        reason: REASON_DUPLICATE_NAME.to_string(),
    };

    // Both map to the same flat name; only the first in sorted order renders.
    let first = orchestrator.run(input.path(), output.path(), None).unwrap();
    assert_eq!(first.succeeded(), 1);
    assert_eq!(first.skipped(), 1);
    assert_eq!(first.outcomes[0].outcome, Outcome::Success);
    assert!(first.outcomes[0].video.ends_with("one/clip.mp4"));
    assert_eq!(first.outcomes[1].outcome, duplicate);
    assert_eq!(pipeline.rendered.lock().unwrap().len(), 1);

    let second = orchestrator.run(input.path(), output.path(), None).unwrap();
    assert_eq!(second.skipped(), 2);
    assert!(second.outcomes.iter().all(|record| record.outcome == duplicate));
}

#[test]
fn duplicate_names_are_skipped_even_with_overwrite() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "a/clip.mp4");
    touch(input.path(), "b/clip.mkv");
    touch(input.path(), "c/clip.webm");

    let pipeline = Arc::new(FakePipeline::default());
    let config = ProcessingConfig::builder()
        .with_overwrite_existing(true)
        .build()
        .unwrap();
    let options = BatchOptions::new().with_follow_structure(false);
    let summary = BatchOrchestrator::with_pipeline(config, options, pipeline.clone())
        .unwrap()
        .run(input.path(), output.path(), None)
        .unwrap();

    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.skipped(), 2);
    assert_eq!(pipeline.rendered_names(), vec!["clip.mp4"]);
}

#[test]
fn overwrite_renders_again() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "a.mp4");
    touch(output.path(), "a.jpg");

    let config = ProcessingConfig::builder()
        .with_overwrite_existing(true)
        .build()
        .unwrap();
    let pipeline = Arc::new(FakePipeline::default());
    let summary = BatchOrchestrator::with_pipeline(config, BatchOptions::new(), pipeline.clone())
        .unwrap()
        .run(input.path(), output.path(), None)
        .unwrap();

    assert_eq!(summary.succeeded(), 1);
    assert!(image::open(output.path().join("a.jpg")).is_ok());
}

#[test]
fn all_skipped_never_prepares_pipeline() {
    struct PrepareCounter(AtomicUsize);

    impl VideoPipeline for PrepareCounter {
        fn prepare(&self) -> Result<(), ScreenMachineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn render(&self, _: &Path) -> Result<RgbImage, ScreenMachineError> {
            panic!("nothing should be rendered");
        }
    }

    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "a.mp4");
    touch(output.path(), "a.jpg");

    let pipeline = Arc::new(PrepareCounter(AtomicUsize::new(0)));
    let summary = BatchOrchestrator::with_pipeline(
        ProcessingConfig::default(),
        BatchOptions::new(),
        pipeline.clone(),
    )
    .unwrap()
    .run(input.path(), output.path(), None)
    .unwrap();

    assert_eq!(summary.skipped(), 1);
    assert_eq!(pipeline.0.load(Ordering::SeqCst), 0);
}

// ── Errors ──────────────────────────────────────────────────────────

#[test]
fn failed_video_does_not_stop_the_batch() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        touch(input.path(), name);
    }

    let pipeline = Arc::new(FakePipeline::failing(vec!["b.mp4"]));
    let summary = orchestrator(BatchOptions::new().with_workers(3), pipeline.clone())
        .run(input.path(), output.path(), None)
        .unwrap();

    assert_eq!(pipeline.rendered_names(), vec!["a.mp4", "b.mp4", "c.mp4"]);
    assert_eq!(summary.to_string(), "Complete! Processed: 2, Skipped: 0, Errors: 1");
    assert_eq!(
        summary.outcomes[1].outcome,
        Outcome::Error {
            message: "Could not extract screenshots".to_string()
        }
    );
    assert!(!output.path().join("b.jpg").exists());
    assert!(output.path().join("c.jpg").exists());
}

#[test]
fn panicking_video_is_recorded_as_an_error() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        touch(input.path(), name);
    }

    let pipeline = Arc::new(FakePipeline::panicking(vec!["a.mp4"]));
    let summary = orchestrator(BatchOptions::new().with_workers(2), pipeline.clone())
        .run(input.path(), output.path(), None)
        .unwrap();

    assert_eq!(pipeline.rendered_names(), vec!["a.mp4", "b.mp4", "c.mp4"]);
    assert_eq!(summary.to_string(), "Complete! Processed: 2, Skipped: 0, Errors: 1");
    assert!(summary.unfinished.is_empty());
    assert_eq!(
        summary.outcomes[0].outcome,
        Outcome::Error {
            message: "Unexpected internal failure".to_string()
        }
    );
    assert!(!output.path().join("a.jpg").exists());
    assert!(output.path().join("b.jpg").exists());
}

#[test]
fn missing_input_root_is_an_error() {
    let output = tempfile::tempdir().unwrap();
    let result = orchestrator(BatchOptions::new(), Arc::new(FakePipeline::default())).run(
        Path::new("definitely/not/here"),
        output.path(),
        None,
    );
    assert!(matches!(result, Err(ScreenMachineError::IoError(_))));
}

#[test]
fn invalid_suffix_is_rejected_up_front() {
    let result = BatchOrchestrator::with_pipeline(
        ProcessingConfig::default(),
        BatchOptions::new().with_suffix("../escape"),
        Arc::new(FakePipeline::default()),
    );
    assert!(matches!(result, Err(ScreenMachineError::ConfigInvalid(_))));
}

// ── Output layout ───────────────────────────────────────────────────

#[test]
fn mirrored_directories_are_created() {
    let input = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let output = scratch.path().join("sheets");
    touch(input.path(), "sub/a.mp4");

    let summary = orchestrator(BatchOptions::new(), Arc::new(FakePipeline::default()))
        .run(input.path(), &output, None)
        .unwrap();

    let expected = output.join("sub").join("a.jpg");
    assert_eq!(summary.outcomes[0].output, expected);
    assert_eq!(image::open(&expected).unwrap().width(), 32);
}

#[test]
fn png_with_suffix() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "clip.webm");

    let options = BatchOptions::new()
        .with_output_format(OutputFormat::Png)
        .with_suffix("_sheet");
    orchestrator(options, Arc::new(FakePipeline::default()))
        .run(input.path(), output.path(), None)
        .unwrap();

    let written = image::open(output.path().join("clip_sheet.png")).unwrap().to_rgb8();
    assert_eq!(written.get_pixel(0, 0), &Rgb([40, 120, 200]));
}

#[test]
fn empty_input_gives_empty_summary() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "notes.txt");

    let summary = orchestrator(BatchOptions::new(), Arc::new(FakePipeline::default()))
        .run(input.path(), output.path(), None)
        .unwrap();
    assert!(summary.outcomes.is_empty());
    assert!(!summary.cancelled);
}

// ── Workers ─────────────────────────────────────────────────────────

#[test]
fn worker_count_is_clamped() {
    let pipeline = Arc::new(FakePipeline::default());
    assert_eq!(orchestrator(BatchOptions::new().with_workers(8), pipeline.clone()).worker_count(3), 3);
    assert_eq!(orchestrator(BatchOptions::new().with_workers(0), pipeline.clone()).worker_count(5), 1);
    assert_eq!(orchestrator(BatchOptions::new().with_workers(64), pipeline).worker_count(100), 16);
}

// ── Progress and preview ────────────────────────────────────────────

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressInfo>>);

impl BatchProgress for Recorder {
    fn on_progress(&self, info: &ProgressInfo) {
        self.0.lock().unwrap().push(info.clone());
    }
}

#[test]
fn progress_reaches_completion() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        touch(input.path(), name);
    }
    touch(output.path(), "a.jpg");

    let recorder = Arc::new(Recorder::default());
    orchestrator(BatchOptions::new(), Arc::new(FakePipeline::failing(vec!["c.mp4"])))
        .with_progress(recorder.clone())
        .run(input.path(), output.path(), None)
        .unwrap();

    let reports = recorder.0.lock().unwrap();
    assert_eq!(reports.len(), 3);
    let last = reports.last().unwrap();
    assert_eq!((last.completed, last.skipped, last.failed), (1, 1, 1));
    assert!((last.fraction - 1.0).abs() < f32::EPSILON);
}

#[derive(Default)]
struct CollectingPreview {
    seen: Vec<(String, (u32, u32))>,
}

impl PreviewSink for CollectingPreview {
    fn show(&mut self, video: &Path, sheet: &RgbImage) {
        let name = video.file_name().unwrap().to_string_lossy().to_string();
        self.seen.push((name, sheet.dimensions()));
    }
}

#[test]
fn preview_receives_each_finished_sheet() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        touch(input.path(), name);
    }

    let mut preview = CollectingPreview::default();
    orchestrator(BatchOptions::new(), Arc::new(FakePipeline::failing(vec!["a.mp4"])))
        .run(input.path(), output.path(), Some(&mut preview))
        .unwrap();

    let mut names: Vec<_> = preview.seen.iter().map(|(name, _)| name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["b.mp4", "c.mp4"]);
    assert!(preview.seen.iter().all(|(_, size)| *size == (32, 18)));
}

// ── Cancellation ────────────────────────────────────────────────────

/// Cancels the token once `after` videos have completed.
struct CancelAfter {
    token: CancellationToken,
    after: usize,
}

impl BatchProgress for CancelAfter {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.finished() >= self.after {
            self.token.cancel();
        }
    }
}

#[test]
fn cancellation_stops_recording_outcomes() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4", "d.mp4", "e.mp4"] {
        touch(input.path(), name);
    }

    let token = CancellationToken::new();
    let pipeline = Arc::new(FakePipeline::slow(Duration::from_millis(50)));
    let summary = orchestrator(BatchOptions::new().with_workers(1), pipeline.clone())
        .with_cancellation(token.clone())
        .with_progress(Arc::new(CancelAfter {
            token: token.clone(),
            after: 2,
        }))
        .run(input.path(), output.path(), None)
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.unfinished.len(), 3);
    // At most one more video was already running when the token was raised.
    assert!(pipeline.rendered_names().len() <= 3);
    assert!(summary.to_string().starts_with("Stopped!"));
}

#[test]
fn cancelled_before_start_renders_nothing() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(input.path(), "a.mp4");
    touch(input.path(), "b.mp4");

    let token = CancellationToken::new();
    token.cancel();
    let pipeline = Arc::new(FakePipeline::default());
    let summary = orchestrator(BatchOptions::new(), pipeline.clone())
        .with_cancellation(token)
        .run(input.path(), output.path(), None)
        .unwrap();

    assert!(summary.cancelled);
    assert!(pipeline.rendered_names().is_empty());
    assert_eq!(summary.unfinished.len(), 2);
}

/// Runs a child that outlives its timeout, so every render ends in a kill.
#[cfg(unix)]
struct HangingDecoder;

#[cfg(unix)]
impl VideoPipeline for HangingDecoder {
    fn render(&self, _: &Path) -> Result<RgbImage, ScreenMachineError> {
        screenmachine::process::ScopedProcess::new("sh", Duration::from_millis(300))
            .args(["-c", "sleep 30 & sleep 30"])
            .run()?;
        Err(ScreenMachineError::ExtractionFailed {
            path: PathBuf::from("unreachable"),
        })
    }
}

#[cfg(unix)]
#[test]
fn cancelled_batch_leaves_no_decoder_processes() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4", "d.mp4", "e.mp4"] {
        touch(input.path(), name);
    }

    let token = CancellationToken::new();
    let start = Instant::now();
    let summary = BatchOrchestrator::with_pipeline(
        ProcessingConfig::default(),
        BatchOptions::new().with_workers(2),
        Arc::new(HangingDecoder),
    )
    .unwrap()
    .with_cancellation(token.clone())
    .with_progress(Arc::new(CancelAfter { token, after: 2 }))
    .run(input.path(), output.path(), None)
    .unwrap();

    assert!(summary.cancelled);
    assert!(summary.outcomes.len() >= 2);
    assert!(summary.outcomes.iter().all(|record| matches!(record.outcome, Outcome::Error { .. })));
    assert_eq!(screenmachine::process::live_children(), 0);
    assert!(start.elapsed() < Duration::from_secs(10));
}
