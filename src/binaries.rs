//! Locating the `ffmpeg` and `ffprobe` executables.
//!
//! Resolution order: a directory bundled alongside the running program, then
//! the system `PATH`, then (with the `download` feature) a one-time download
//! of a static build into the bundled directory. Callers normally go through
//! [`RuntimeContext::decoder_binaries`](crate::RuntimeContext::decoder_binaries),
//! which caches the result.

use std::{
    env,
    path::{Path, PathBuf},
};

use crate::error::ScreenMachineError;

/// Where a set of binaries was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    /// Next to the running executable (or the configured bundle directory).
    Bundled,
    /// On the system `PATH`.
    SystemPath,
    /// Fetched by this process.
    Downloaded,
}

/// Resolved decoder executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderBinaries {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub source: BinarySource,
}

/// Which locations [`resolve`] may look in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct BinarySearch {
    /// Directory checked first; also the download destination.
    pub bundled_dir: Option<PathBuf>,
    /// Search the `PATH` environment variable.
    pub use_system_path: bool,
    /// Download a static build if nothing was found. Ignored without the
    /// `download` feature.
    pub allow_download: bool,
}

impl Default for BinarySearch {
    fn default() -> Self {
        let bundled_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self {
            bundled_dir,
            use_system_path: true,
            allow_download: cfg!(feature = "download"),
        }
    }
}

impl BinarySearch {
    /// Look only in `dir`: no `PATH` lookup, no download.
    pub fn only_in<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            bundled_dir: Some(dir.into()),
            use_system_path: false,
            allow_download: false,
        }
    }

    pub fn with_download(mut self, allow: bool) -> Self {
        self.allow_download = allow;
        self
    }
}

/// Platform file name of an executable (`ffmpeg` or `ffmpeg.exe`).
pub fn executable_name(name: &str) -> String {
    format!("{name}{}", env::consts::EXE_SUFFIX)
}

/// Resolve both executables according to `search`.
///
/// This does no caching; see
/// [`RuntimeContext::decoder_binaries`](crate::RuntimeContext::decoder_binaries).
///
/// # Errors
///
/// Returns [`ScreenMachineError::DecoderUnavailable`] if neither location
/// holds both executables and downloading is off, or
/// [`ScreenMachineError::DownloadFailed`] if the download was attempted and
/// failed.
pub fn resolve(search: &BinarySearch) -> Result<DecoderBinaries, ScreenMachineError> {
    if let Some(found) = search.bundled_dir.as_deref().and_then(find_in_dir) {
        return Ok(found);
    }

    if search.use_system_path
        && let (Some(ffmpeg), Some(ffprobe)) = (find_on_path("ffmpeg"), find_on_path("ffprobe"))
    {
        return Ok(DecoderBinaries {
            ffmpeg,
            ffprobe,
            source: BinarySource::SystemPath,
        });
    }

    #[cfg(feature = "download")]
    if search.allow_download {
        let target = search.bundled_dir.as_deref().ok_or_else(|| {
            ScreenMachineError::DownloadFailed("no directory to install into".to_string())
        })?;
        return download::install_into(target);
    }

    Err(ScreenMachineError::DecoderUnavailable(
        "ffmpeg and ffprobe were not found next to the executable or on PATH".to_string(),
    ))
}

fn find_in_dir(dir: &Path) -> Option<DecoderBinaries> {
    let ffmpeg = dir.join(executable_name("ffmpeg"));
    let ffprobe = dir.join(executable_name("ffprobe"));
    (ffmpeg.is_file() && ffprobe.is_file()).then_some(DecoderBinaries {
        ffmpeg,
        ffprobe,
        source: BinarySource::Bundled,
    })
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let file_name = executable_name(name);
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

#[cfg(feature = "download")]
mod download {
    use std::{
        fs::{self, File},
        io,
        path::Path,
        time::Duration,
    };

    use indicatif::{ProgressBar, ProgressStyle};
    use walkdir::WalkDir;

    use super::{BinarySource, DecoderBinaries, executable_name};
    use crate::{error::ScreenMachineError, process::ScopedProcess};

    const RELEASE_BASE: &str = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest";
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
    const EXTRACT_TIMEOUT: Duration = Duration::from_secs(300);

    fn archive_name() -> Option<&'static str> {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("windows", "x86_64") => Some("ffmpeg-master-latest-win64-gpl.zip"),
            ("linux", "x86_64") => Some("ffmpeg-master-latest-linux64-gpl.tar.xz"),
            ("linux", "aarch64") => Some("ffmpeg-master-latest-linuxarm64-gpl.tar.xz"),
            _ => None,
        }
    }

    fn failed<E: std::fmt::Display>(error: E) -> ScreenMachineError {
        ScreenMachineError::DownloadFailed(error.to_string())
    }

    pub(super) fn install_into(target: &Path) -> Result<DecoderBinaries, ScreenMachineError> {
        let archive = archive_name().ok_or_else(|| {
            failed(format!(
                "no prebuilt FFmpeg for {}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
        })?;
        let url = format!("{RELEASE_BASE}/{archive}");
        log::info!("Downloading FFmpeg from {url}");

        let scratch = tempfile::tempdir()?;
        let archive_path = scratch.path().join(archive);
        fetch(&url, &archive_path)?;

        // bsdtar (bundled with Windows 10+) also unpacks zip archives.
        ScopedProcess::new("tar", EXTRACT_TIMEOUT)
            .arg("-xf")
            .arg(&archive_path)
            .arg("-C")
            .arg(scratch.path())
            .run()?
            .into_success("tar")?;

        fs::create_dir_all(target)?;
        let ffmpeg = install_binary(scratch.path(), target, "ffmpeg")?;
        let ffprobe = install_binary(scratch.path(), target, "ffprobe")?;
        log::info!("Installed FFmpeg into {}", target.display());

        Ok(DecoderBinaries {
            ffmpeg,
            ffprobe,
            source: BinarySource::Downloaded,
        })
    }

    fn fetch(url: &str, destination: &Path) -> Result<(), ScreenMachineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(failed)?;
        let response = client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(failed)?;

        let progress_bar = ProgressBar::new(response.content_length().unwrap_or(0));
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .map_err(failed)?
                .progress_chars("#>-"),
        );
        progress_bar.set_message("Downloading FFmpeg");

        let mut file = File::create(destination)?;
        io::copy(&mut progress_bar.wrap_read(response), &mut file)?;
        progress_bar.finish_and_clear();
        Ok(())
    }

    fn install_binary(
        unpacked: &Path,
        target: &Path,
        name: &str,
    ) -> Result<std::path::PathBuf, ScreenMachineError> {
        let file_name = executable_name(name);
        let source = WalkDir::new(unpacked)
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name.as_str())
            .ok_or_else(|| failed(format!("{file_name} missing from archive")))?;

        let destination = target.join(&file_name);
        fs::copy(source.path(), &destination)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&destination, fs::Permissions::from_mode(0o755))?;
        }

        Ok(destination)
    }
}
