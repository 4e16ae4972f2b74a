//! Shared state for one batch run.
//!
//! [`RuntimeContext`] replaces process-global caches with explicit fields. A
//! context is created by the caller, shared (behind an [`Arc`]) with every
//! worker of a batch, and dropped when the batch ends; its caches live exactly
//! that long.
//!
//! [`Arc`]: std::sync::Arc

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{OnceLock, PoisonError, RwLock},
};

use crate::{
    binaries::{self, BinarySearch, DecoderBinaries},
    error::ScreenMachineError,
};

/// Caches and one-time initialization shared by the workers of a batch.
///
/// - File sizes are cached per path, write-once, never evicted. Two workers
///   racing on the same path both stat it and the second write is dropped.
/// - Decoder binaries are resolved at most once, and the outcome is kept
///   whether it succeeded or not. Concurrent callers block on the resolver
///   instead of starting their own download.
#[derive(Debug)]
pub struct RuntimeContext {
    search: BinarySearch,
    file_sizes: RwLock<HashMap<PathBuf, u64>>,
    binaries: OnceLock<Result<DecoderBinaries, ResolveFailure>>,
}

/// A failed resolution, kept so that later callers get the same error
/// without searching (or downloading) again.
#[derive(Debug, Clone)]
enum ResolveFailure {
    Unavailable(String),
    Download(String),
}

impl ResolveFailure {
    fn from_error(error: ScreenMachineError) -> Self {
        match error {
            ScreenMachineError::DecoderUnavailable(message) => ResolveFailure::Unavailable(message),
            ScreenMachineError::DownloadFailed(message) => ResolveFailure::Download(message),
            other => ResolveFailure::Download(other.to_string()),
        }
    }

    fn to_error(&self) -> ScreenMachineError {
        match self {
            ResolveFailure::Unavailable(message) => {
                ScreenMachineError::DecoderUnavailable(message.clone())
            }
            ResolveFailure::Download(message) => ScreenMachineError::DownloadFailed(message.clone()),
        }
    }
}

impl RuntimeContext {
    /// A context that looks for decoder binaries next to the running
    /// executable, then on `PATH`, then (with the `download` feature)
    /// downloads them.
    pub fn new() -> Self {
        Self::with_search(BinarySearch::default())
    }

    /// A context with an explicit binary search policy.
    pub fn with_search(search: BinarySearch) -> Self {
        Self {
            search,
            file_sizes: RwLock::new(HashMap::new()),
            binaries: OnceLock::new(),
        }
    }

    /// Size of `path` in bytes, or 0 if it cannot be read.
    pub fn file_size(&self, path: &Path) -> u64 {
        if let Some(size) = self
            .file_sizes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return *size;
        }

        let size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        *self
            .file_sizes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_insert(size)
    }

    /// Number of paths whose size has been cached.
    pub fn cached_file_sizes(&self) -> usize {
        self.file_sizes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolved `ffmpeg`/`ffprobe` locations.
    ///
    /// The first resolution, successful or not, is cached for the lifetime of
    /// the context. While one thread is resolving (which may include a
    /// download) other callers block until it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::DecoderUnavailable`] if no binaries were
    /// found, or [`ScreenMachineError::DownloadFailed`] if fetching them failed.
    pub fn decoder_binaries(&self) -> Result<DecoderBinaries, ScreenMachineError> {
        self.binaries
            .get_or_init(|| match binaries::resolve(&self.search) {
                Ok(found) => {
                    log::debug!(
                        "Using ffmpeg at {} ({:?})",
                        found.ffmpeg.display(),
                        found.source
                    );
                    Ok(found)
                }
                Err(error) => {
                    log::debug!("Decoder binaries unavailable: {error}");
                    Err(ResolveFailure::from_error(error))
                }
            })
            .clone()
            .map_err(|failure| failure.to_error())
    }

    /// `true` if binaries have been resolved successfully.
    ///
    /// Does not trigger a resolution; call
    /// [`decoder_binaries`](Self::decoder_binaries) for that.
    pub fn has_decoder_binaries(&self) -> bool {
        matches!(self.binaries.get(), Some(Ok(_)))
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}
