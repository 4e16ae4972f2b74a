//! Input enumeration, output naming and image encoding.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{
    ExtendedColorType, ImageEncoder, RgbImage,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
};
use walkdir::WalkDir;

use crate::{
    configuration::{BatchOptions, OutputFormat},
    error::ScreenMachineError,
};

/// Extensions (lowercase, without dot) treated as videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "wmv", "mkv", "mov", "m4v", "webm"];

/// `true` if `path` has one of [`VIDEO_EXTENSIONS`], ignoring case.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension))
        })
}

/// All video files under `root`, recursively, sorted by path.
///
/// Entries that cannot be read are skipped with a warning.
///
/// # Errors
///
/// Returns [`ScreenMachineError::IoError`] if `root` is not a directory.
pub fn find_video_files<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>, ScreenMachineError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ScreenMachineError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )));
    }

    let mut videos: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                log::warn!("Skipping unreadable entry: {error}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_video_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    videos.sort();
    log::debug!("Found {} videos under {}", videos.len(), root.display());
    Ok(videos)
}

/// Where the sheet for `video` goes.
///
/// The file name is the video's stem plus `options.suffix` plus the format's
/// extension. With `follow_structure`, the video's directory relative to
/// `input_root` is recreated under `output_root`; if `video` is not under
/// `input_root` the file goes directly into `output_root`.
pub fn output_path(
    video: &Path,
    input_root: &Path,
    output_root: &Path,
    options: &BatchOptions,
) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let file_name = format!(
        "{stem}{}{}",
        options.suffix,
        options.output_format.extension()
    );

    if options.follow_structure
        && let Some(relative) = video
            .parent()
            .and_then(|parent| parent.strip_prefix(input_root).ok())
    {
        return output_root.join(relative).join(file_name);
    }
    output_root.join(file_name)
}

/// Create the parent directory of `path` if it is missing.
///
/// # Errors
///
/// Returns [`ScreenMachineError::IoError`] if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> Result<(), ScreenMachineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write `image` to `path` as JPEG (at `quality`) or fast-compressed PNG.
///
/// A partially written file is removed on failure.
///
/// # Errors
///
/// Returns [`ScreenMachineError::EncodeFailed`] if the file cannot be created
/// or encoded.
pub fn encode_image(
    image: &RgbImage,
    path: &Path,
    format: OutputFormat,
    quality: u8,
) -> Result<(), ScreenMachineError> {
    let encode_failed = |reason: String| ScreenMachineError::EncodeFailed {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::create(path).map_err(|error| encode_failed(error.to_string()))?;
    let mut writer = BufWriter::new(file);
    let (width, height) = image.dimensions();

    let result = match format {
        OutputFormat::Jpg => JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8),
        OutputFormat::Png => {
            PngEncoder::new_with_quality(&mut writer, CompressionType::Fast, FilterType::Adaptive)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
        }
    }
    .map_err(|error| error.to_string())
    .and_then(|()| writer.flush().map_err(|error| error.to_string()));

    if let Err(reason) = result {
        drop(writer);
        if let Err(error) = fs::remove_file(path) {
            log::debug!("Could not remove partial {}: {error}", path.display());
        }
        return Err(encode_failed(reason));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_extensions_ignore_case() {
        assert!(is_video_file(Path::new("a.MP4")));
        assert!(is_video_file(Path::new("dir/b.webm")));
        assert!(!is_video_file(Path::new("c.txt")));
        assert!(!is_video_file(Path::new("mp4")));
    }

    #[test]
    fn output_path_mirrors_structure() {
        let options = BatchOptions::new();
        let path = output_path(
            Path::new("/in/sub/a.mp4"),
            Path::new("/in"),
            Path::new("/out"),
            &options,
        );
        assert_eq!(path, PathBuf::from("/out/sub/a.jpg"));
    }

    #[test]
    fn output_path_flat_with_suffix() {
        let options = BatchOptions::new()
            .with_follow_structure(false)
            .with_suffix("_sheet")
            .with_output_format(OutputFormat::Png);
        let path = output_path(
            Path::new("/in/sub/a.mp4"),
            Path::new("/in"),
            Path::new("/out"),
            &options,
        );
        assert_eq!(path, PathBuf::from("/out/a_sheet.png"));
    }

    #[test]
    fn output_path_outside_input_root_goes_to_root() {
        let path = output_path(
            Path::new("/elsewhere/a.mkv"),
            Path::new("/in"),
            Path::new("/out"),
            &BatchOptions::new(),
        );
        assert_eq!(path, PathBuf::from("/out/a.jpg"));
    }

    #[test]
    fn encodes_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10]));

        let jpg = dir.path().join("a.jpg");
        encode_image(&image, &jpg, OutputFormat::Jpg, 75).unwrap();
        assert_eq!(image::open(&jpg).unwrap().width(), 16);

        let png = dir.path().join("a.png");
        encode_image(&image, &png, OutputFormat::Png, 75).unwrap();
        assert_eq!(image::open(&png).unwrap().to_rgb8(), image);
    }

    #[test]
    fn missing_directory_is_encode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(4, 4);
        let result = encode_image(
            &image,
            &dir.path().join("missing/a.jpg"),
            OutputFormat::Jpg,
            75,
        );
        assert!(matches!(result, Err(ScreenMachineError::EncodeFailed { .. })));
    }
}
