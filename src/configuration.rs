//! Processing and batch configuration.
//!
//! [`ProcessingConfig`] is the immutable, validated description of one grid:
//! layout, cell bounds, encoder quality and which labels to draw. It is built
//! through [`ProcessingConfigBuilder`] (or deserialized from a settings file)
//! and rejected at construction time if any value is out of range, so nothing
//! downstream has to re-validate.
//!
//! [`BatchOptions`] carries the knobs that only matter to a batch run: output
//! format, worker count, directory mirroring and filename suffix.
//!
//! # Example
//!
//! ```
//! use screenmachine::{BatchOptions, OutputFormat, ProcessingConfig};
//!
//! let config = ProcessingConfig::builder()
//!     .with_grid(3, 5)
//!     .with_max_screenshot_size(480, 270)
//!     .with_show_timestamps(true)
//!     .build()?;
//! assert_eq!(config.total_screenshots(), 15);
//!
//! let options = BatchOptions::new()
//!     .with_output_format(OutputFormat::Png)
//!     .with_workers(4);
//! # Ok::<(), screenmachine::ScreenMachineError>(())
//! ```

use std::{fmt, fs, path::Path, str::FromStr};

use image::imageops::FilterType;
use serde::Deserialize;

use crate::error::ScreenMachineError;

/// Image format written for each composed grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum OutputFormat {
    /// Baseline JPEG at the configured quality. This is the default.
    #[default]
    #[serde(alias = "jpg", alias = "JPG", alias = "jpeg", alias = "JPEG")]
    Jpg,
    /// PNG with fast, low-effort compression.
    #[serde(alias = "png", alias = "PNG")]
    Png,
}

impl OutputFormat {
    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => ".jpg",
            OutputFormat::Png => ".png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Jpg => f.write_str("JPG"),
            OutputFormat::Png => f.write_str("PNG"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ScreenMachineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            other => Err(ScreenMachineError::ConfigInvalid(format!(
                "unsupported output format: {other}"
            ))),
        }
    }
}

/// How the compositor gets from decoded frames to the final grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    /// Scale every frame into its cell box, then paste edge-to-edge.
    /// Lower peak memory.
    ResizeEach,
    /// Paste full-resolution frames, then scale the whole canvas once.
    /// This is the default.
    #[default]
    ResizeOnce,
}

/// Resampling filter used whenever frames or grids are scaled down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    /// Nearest-neighbour. Fastest; the default.
    #[default]
    Nearest,
    /// Bilinear.
    Triangle,
    /// Lanczos with a window of 3. Slowest, sharpest.
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl FromStr for ResizeFilter {
    type Err = ScreenMachineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResizeFilter::Nearest),
            "triangle" | "bilinear" => Ok(ResizeFilter::Triangle),
            "lanczos" | "lanczos3" => Ok(ResizeFilter::Lanczos3),
            other => Err(ScreenMachineError::ConfigInvalid(format!(
                "unsupported resize filter: {other}"
            ))),
        }
    }
}

/// A bounding box that decoded frames are scaled to fit inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBox {
    /// Maximum width in pixels.
    pub max_width: u32,
    /// Maximum height in pixels.
    pub max_height: u32,
}

impl TargetBox {
    /// Create a box of `max_width × max_height`.
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    /// Scale factor that fits `width × height` inside the box.
    ///
    /// The factor is `min(width_ratio, height_ratio)` capped at `1.0`, so
    /// frames are never upscaled.
    pub fn scale_factor(&self, width: u32, height: u32) -> f64 {
        if width == 0 || height == 0 {
            return 1.0;
        }
        let width_ratio = self.max_width as f64 / width as f64;
        let height_ratio = self.max_height as f64 / height as f64;
        width_ratio.min(height_ratio).min(1.0)
    }

    /// Dimensions of `width × height` after fitting inside the box.
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = self.scale_factor(width, height);
        if scale >= 1.0 {
            return (width, height);
        }
        let fitted_width = ((width as f64) * scale) as u32;
        let fitted_height = ((height as f64) * scale) as u32;
        (fitted_width.max(1), fitted_height.max(1))
    }
}

/// Immutable, validated settings for one contact sheet.
///
/// Construct with [`ProcessingConfig::builder`]; invalid values fail in
/// [`ProcessingConfigBuilder::build`], never later.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ProcessingConfigBuilder")]
pub struct ProcessingConfig {
    rows: u32,
    columns: u32,
    max_screenshot_width: u32,
    max_screenshot_height: u32,
    jpg_quality: u8,
    overwrite_existing: bool,
    show_title: bool,
    show_resolution: bool,
    show_file_size: bool,
    show_duration: bool,
    show_codec: bool,
    show_timestamps: bool,
}

impl ProcessingConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder::default()
    }

    /// Number of grid rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of grid columns.
    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Maximum width of one cell.
    pub fn max_screenshot_width(&self) -> u32 {
        self.max_screenshot_width
    }

    /// Maximum height of one cell.
    pub fn max_screenshot_height(&self) -> u32 {
        self.max_screenshot_height
    }

    /// The per-cell bounds as a [`TargetBox`].
    pub fn cell_box(&self) -> TargetBox {
        TargetBox::new(self.max_screenshot_width, self.max_screenshot_height)
    }

    /// JPEG quality in `1..=100`.
    pub fn jpg_quality(&self) -> u8 {
        self.jpg_quality
    }

    /// Whether existing output files are replaced.
    pub fn overwrite_existing(&self) -> bool {
        self.overwrite_existing
    }

    pub fn show_title(&self) -> bool {
        self.show_title
    }

    pub fn show_resolution(&self) -> bool {
        self.show_resolution
    }

    pub fn show_file_size(&self) -> bool {
        self.show_file_size
    }

    pub fn show_duration(&self) -> bool {
        self.show_duration
    }

    pub fn show_codec(&self) -> bool {
        self.show_codec
    }

    pub fn show_timestamps(&self) -> bool {
        self.show_timestamps
    }

    /// `true` if at least one header label is enabled.
    pub fn any_header_label(&self) -> bool {
        self.show_title
            || self.show_resolution
            || self.show_file_size
            || self.show_duration
            || self.show_codec
    }

    /// Number of frames a grid needs: `rows * columns`.
    pub fn total_screenshots(&self) -> u32 {
        self.rows * self.columns
    }

    /// Return a builder seeded with this configuration's values.
    pub fn to_builder(&self) -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            rows: self.rows,
            columns: self.columns,
            max_screenshot_width: self.max_screenshot_width,
            max_screenshot_height: self.max_screenshot_height,
            jpg_quality: self.jpg_quality as u32,
            overwrite_existing: self.overwrite_existing,
            show_title: self.show_title,
            show_resolution: self.show_resolution,
            show_file_size: self.show_file_size,
            show_duration: self.show_duration,
            show_codec: self.show_codec,
            show_timestamps: self.show_timestamps,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let defaults = ProcessingConfigBuilder::default();
        Self {
            rows: defaults.rows,
            columns: defaults.columns,
            max_screenshot_width: defaults.max_screenshot_width,
            max_screenshot_height: defaults.max_screenshot_height,
            jpg_quality: defaults.jpg_quality as u8,
            overwrite_existing: defaults.overwrite_existing,
            show_title: defaults.show_title,
            show_resolution: defaults.show_resolution,
            show_file_size: defaults.show_file_size,
            show_duration: defaults.show_duration,
            show_codec: defaults.show_codec,
            show_timestamps: defaults.show_timestamps,
        }
    }
}

/// Builder for [`ProcessingConfig`].
///
/// Fields deserialize with defaults, so a settings file only has to name the
/// values it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[must_use]
pub struct ProcessingConfigBuilder {
    rows: u32,
    columns: u32,
    max_screenshot_width: u32,
    max_screenshot_height: u32,
    jpg_quality: u32,
    overwrite_existing: bool,
    show_title: bool,
    show_resolution: bool,
    show_file_size: bool,
    show_duration: bool,
    show_codec: bool,
    show_timestamps: bool,
}

impl Default for ProcessingConfigBuilder {
    fn default() -> Self {
        Self {
            rows: 4,
            columns: 4,
            max_screenshot_width: 320,
            max_screenshot_height: 240,
            jpg_quality: 75,
            overwrite_existing: false,
            show_title: true,
            show_resolution: true,
            show_file_size: true,
            show_duration: true,
            show_codec: false,
            show_timestamps: false,
        }
    }
}

impl ProcessingConfigBuilder {
    /// Set the grid to `rows × columns`.
    pub fn with_grid(mut self, rows: u32, columns: u32) -> Self {
        self.rows = rows;
        self.columns = columns;
        self
    }

    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_columns(mut self, columns: u32) -> Self {
        self.columns = columns;
        self
    }

    /// Set the maximum size of one cell.
    pub fn with_max_screenshot_size(mut self, width: u32, height: u32) -> Self {
        self.max_screenshot_width = width;
        self.max_screenshot_height = height;
        self
    }

    pub fn with_jpg_quality(mut self, quality: u32) -> Self {
        self.jpg_quality = quality;
        self
    }

    pub fn with_overwrite_existing(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn with_show_title(mut self, show: bool) -> Self {
        self.show_title = show;
        self
    }

    pub fn with_show_resolution(mut self, show: bool) -> Self {
        self.show_resolution = show;
        self
    }

    pub fn with_show_file_size(mut self, show: bool) -> Self {
        self.show_file_size = show;
        self
    }

    pub fn with_show_duration(mut self, show: bool) -> Self {
        self.show_duration = show;
        self
    }

    pub fn with_show_codec(mut self, show: bool) -> Self {
        self.show_codec = show;
        self
    }

    pub fn with_show_timestamps(mut self, show: bool) -> Self {
        self.show_timestamps = show;
        self
    }

    /// Turn every header label and the timestamp overlay off.
    pub fn without_labels(self) -> Self {
        self.with_show_title(false)
            .with_show_resolution(false)
            .with_show_file_size(false)
            .with_show_duration(false)
            .with_show_codec(false)
            .with_show_timestamps(false)
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::ConfigInvalid`] if rows, columns or the
    /// cell size are zero, or if the JPEG quality is outside `1..=100`.
    pub fn build(self) -> Result<ProcessingConfig, ScreenMachineError> {
        if self.rows < 1 || self.columns < 1 {
            return Err(ScreenMachineError::ConfigInvalid(
                "Rows and columns must be at least 1".to_string(),
            ));
        }
        if self.rows.checked_mul(self.columns).is_none() {
            return Err(ScreenMachineError::ConfigInvalid(
                "Grid has too many cells".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpg_quality) {
            return Err(ScreenMachineError::ConfigInvalid(
                "JPG quality must be between 1 and 100".to_string(),
            ));
        }
        if self.max_screenshot_width < 1 || self.max_screenshot_height < 1 {
            return Err(ScreenMachineError::ConfigInvalid(
                "Screenshot dimensions must be at least 1 pixel".to_string(),
            ));
        }

        Ok(ProcessingConfig {
            rows: self.rows,
            columns: self.columns,
            max_screenshot_width: self.max_screenshot_width,
            max_screenshot_height: self.max_screenshot_height,
            jpg_quality: self.jpg_quality as u8,
            overwrite_existing: self.overwrite_existing,
            show_title: self.show_title,
            show_resolution: self.show_resolution,
            show_file_size: self.show_file_size,
            show_duration: self.show_duration,
            show_codec: self.show_codec,
            show_timestamps: self.show_timestamps,
        })
    }
}

impl TryFrom<ProcessingConfigBuilder> for ProcessingConfig {
    type Error = ScreenMachineError;

    fn try_from(builder: ProcessingConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

/// Settings that only apply to a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[must_use]
pub struct BatchOptions {
    /// Output image format.
    pub output_format: OutputFormat,
    /// Requested worker count; clamped to `1..=min(pending, 16)` at run time.
    pub workers: usize,
    /// Mirror the input directory tree under the output root.
    pub follow_structure: bool,
    /// Appended to the video's file stem before the extension.
    pub suffix: String,
    /// How frames are assembled into the grid.
    pub composition_mode: CompositionMode,
    /// Filter used when scaling frames or grids.
    pub resize_filter: ResizeFilter,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Jpg,
            workers: 2,
            follow_structure: true,
            suffix: String::new(),
            composition_mode: CompositionMode::ResizeOnce,
            resize_filter: ResizeFilter::Nearest,
        }
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_follow_structure(mut self, follow: bool) -> Self {
        self.follow_structure = follow;
        self
    }

    /// Set the filename suffix. Surrounding whitespace is trimmed.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into().trim().to_string();
        self
    }

    pub fn with_composition_mode(mut self, mode: CompositionMode) -> Self {
        self.composition_mode = mode;
        self
    }

    pub fn with_resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.resize_filter = filter;
        self
    }

    /// Reject suffixes that would escape the output directory.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::ConfigInvalid`] if the suffix contains a
    /// path separator.
    pub fn validate(&self) -> Result<(), ScreenMachineError> {
        if self.suffix.contains(['/', '\\']) {
            return Err(ScreenMachineError::ConfigInvalid(format!(
                "Filename suffix may not contain path separators: {}",
                self.suffix
            )));
        }
        Ok(())
    }
}

/// Contents of a JSON settings file.
///
/// ```json
/// {
///   "processing": { "rows": 5, "columns": 6, "show_codec": true },
///   "batch": { "output_format": "png", "workers": 4, "suffix": "_thumb" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub processing: ProcessingConfig,
    pub batch: BatchOptions,
}

impl Settings {
    /// Read and validate a settings file.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::IoError`] if the file cannot be read and
    /// [`ScreenMachineError::ConfigInvalid`] if it does not parse or holds an
    /// out-of-range value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScreenMachineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content).map_err(|error| {
            ScreenMachineError::ConfigInvalid(format!("{}: {error}", path.display()))
        })?;
        settings.batch.validate()?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_application_defaults() {
        let config = ProcessingConfig::default();
        assert_eq!(config.rows(), 4);
        assert_eq!(config.columns(), 4);
        assert_eq!(config.jpg_quality(), 75);
        assert!(config.show_title());
        assert!(!config.show_codec());
        assert!(!config.show_timestamps());
        assert_eq!(config, ProcessingConfig::builder().build().unwrap());
    }

    #[test]
    fn zero_rows_rejected() {
        let result = ProcessingConfig::builder().with_rows(0).build();
        assert!(matches!(result, Err(ScreenMachineError::ConfigInvalid(_))));
    }

    #[test]
    fn quality_out_of_range_rejected() {
        assert!(ProcessingConfig::builder().with_jpg_quality(0).build().is_err());
        assert!(ProcessingConfig::builder().with_jpg_quality(101).build().is_err());
        assert!(ProcessingConfig::builder().with_jpg_quality(100).build().is_ok());
    }

    #[test]
    fn zero_cell_size_rejected() {
        let result = ProcessingConfig::builder()
            .with_max_screenshot_size(0, 240)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn target_box_never_upscales() {
        let cell = TargetBox::new(320, 240);
        assert_eq!(cell.scale_factor(100, 50), 1.0);
        assert_eq!(cell.fit(100, 50), (100, 50));
    }

    #[test]
    fn target_box_preserves_aspect() {
        let cell = TargetBox::new(320, 240);
        assert_eq!(cell.fit(1920, 1080), (320, 180));
        assert_eq!(cell.fit(1080, 1920), (135, 240));
    }

    #[test]
    fn settings_file_validation_is_fail_fast() {
        let bad = r#"{ "processing": { "jpg_quality": 0 } }"#;
        assert!(serde_json::from_str::<Settings>(bad).is_err());

        let good = r#"{ "processing": { "rows": 2 }, "batch": { "output_format": "png" } }"#;
        let settings: Settings = serde_json::from_str(good).unwrap();
        assert_eq!(settings.processing.rows(), 2);
        assert_eq!(settings.processing.columns(), 4);
        assert_eq!(settings.batch.output_format, OutputFormat::Png);
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpg);
        assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert!("gif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn suffix_with_separator_rejected() {
        assert!(BatchOptions::new().with_suffix("../x").validate().is_err());
        assert!(BatchOptions::new().with_suffix(" _thumb ").validate().is_ok());
        assert_eq!(BatchOptions::new().with_suffix(" _thumb ").suffix, "_thumb");
    }
}
