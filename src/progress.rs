//! Batch progress reporting and cancellation support.
//!
//! This module provides [`BatchProgress`] for monitoring a batch run,
//! [`CancellationToken`] for cooperative cancellation, and [`ProgressInfo`]
//! for progress snapshots.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use screenmachine::{BatchOrchestrator, BatchProgress, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl BatchProgress for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:.0}% ({}/{})", info.fraction * 100.0, info.finished(), info.total);
//!     }
//! }
//!
//! let orchestrator = BatchOrchestrator::new(Default::default(), Default::default())?
//!     .with_progress(Arc::new(PrintProgress));
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// A snapshot of batch progress, taken after each finished video.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Videos that produced a sheet.
    pub completed: usize,
    /// Videos skipped because their output already existed.
    pub skipped: usize,
    /// Videos that failed.
    pub failed: usize,
    /// Videos in the batch.
    pub total: usize,
    /// `(skipped + completed + failed) / total`, in `0.0..=1.0`.
    pub fraction: f32,
    /// Wall-clock time since the batch started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on throughput so far.
    pub estimated_remaining: Option<Duration>,
    /// The video that just finished, if any.
    pub current: Option<PathBuf>,
}

impl ProgressInfo {
    /// Videos that are done, whatever their outcome.
    pub fn finished(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

/// Receives progress updates during a batch.
///
/// Callbacks run on the thread that drives the batch, never on a worker, and
/// are infallible. Use [`CancellationToken`] to stop a batch.
pub trait BatchProgress: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications. Used when no callback is configured.
pub(crate) struct NoOpProgress;

impl BatchProgress for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread (a Ctrl-C handler,
/// for instance) to stop the batch. The orchestrator checks
/// [`is_cancelled`](CancellationToken::is_cancelled) between finished videos,
/// and workers check it before starting one.
///
/// # Example
///
/// ```
/// use screenmachine::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts outcomes and emits a [`ProgressInfo`] after each one.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn BatchProgress>,
    total: usize,
    completed: usize,
    skipped: usize,
    failed: usize,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn BatchProgress>, total: usize, start_time: Instant) -> Self {
        Self {
            callback,
            total,
            completed: 0,
            skipped: 0,
            failed: 0,
            start_time,
        }
    }

    pub(crate) fn record_completed(&mut self, path: Option<PathBuf>) {
        self.completed += 1;
        self.report(path);
    }

    pub(crate) fn record_skipped(&mut self, path: Option<PathBuf>) {
        self.skipped += 1;
        self.report(path);
    }

    pub(crate) fn record_failed(&mut self, path: Option<PathBuf>) {
        self.failed += 1;
        self.report(path);
    }

    fn report(&self, current: Option<PathBuf>) {
        let elapsed = self.start_time.elapsed();
        let finished = self.completed + self.skipped + self.failed;

        let fraction = if self.total == 0 {
            1.0
        } else {
            finished as f32 / self.total as f32
        };

        // Skips are nearly free, so only processed videos count toward the rate.
        let processed = self.completed + self.failed;
        let estimated_remaining = (processed > 0).then(|| {
            let remaining = self.total.saturating_sub(finished) as u32;
            (elapsed / processed as u32) * remaining
        });

        self.callback.on_progress(&ProgressInfo {
            completed: self.completed,
            skipped: self.skipped,
            failed: self.failed,
            total: self.total,
            fraction,
            elapsed,
            estimated_remaining,
            current,
        });
    }
}
