//! Contact-sheet composition.
//!
//! [`GridCompositor::compose`] lays frames out row-major on a
//! `columns × rows` grid, adds a header band with the enabled metadata
//! labels, optionally stamps each cell with its timestamp and finally draws a
//! small watermark in the top-right corner.
//!
//! The canvas is always `columns * cell_width` wide and
//! `rows * cell_height + header_height` tall. In
//! [`CompositionMode::ResizeOnce`] the grid is assembled at native frame size
//! and scaled once as a whole, then cropped back to whole cells.
//!
//! # Example
//!
//! ```no_run
//! use screenmachine::{FrameSample, GridCompositor, ProcessingConfig};
//!
//! let config = ProcessingConfig::builder().with_grid(2, 2).build()?;
//! let frames: Vec<FrameSample> = Vec::new(); // from FrameSampler
//! let sheet = GridCompositor::new().compose(&frames, &config, None);
//! sheet.save("sheet.png")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{borrow::Cow, iter};

use image::{Rgb, RgbImage, imageops};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

use crate::{
    configuration::{CompositionMode, ProcessingConfig, ResizeFilter},
    metadata::{VideoMetadata, format_duration, format_file_size, format_timestamp},
    sampler::FrameSample,
    text::TextRenderer,
};

const HEADER_FONT_SIZE: f32 = 18.0;
const HEADER_LINE_HEIGHT: u32 = 28;
const HEADER_PADDING: u32 = 10;
const HEADER_BACKGROUND: Rgb<u8> = Rgb([0x1a, 0x1a, 0x1a]);

const TIMESTAMP_FONT_SIZE: f32 = 14.0;
const TIMESTAMP_PADDING: u32 = 5;

const WATERMARK_FONT_SIZE: f32 = 12.0;
const WATERMARK_PADDING: u32 = 10;
const WATERMARK_COLOR: Rgb<u8> = Rgb([0x77, 0x77, 0x77]);

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Header label lines enabled by `config`, in display order.
///
/// Lines whose value is unknown (no metadata, zero size, zero duration) are
/// left out.
pub fn header_lines(config: &ProcessingConfig, metadata: Option<&VideoMetadata>) -> Vec<String> {
    let Some(metadata) = metadata else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    if config.show_title() {
        lines.push(format!("Title: {}", metadata.filename));
    }
    if config.show_resolution() && metadata.width > 0 && metadata.height > 0 {
        lines.push(format!("Resolution: {} × {}", metadata.width, metadata.height));
    }
    if config.show_file_size() && metadata.file_size > 0 {
        lines.push(format!("File Size: {}", format_file_size(metadata.file_size)));
    }
    if config.show_duration() && metadata.duration > 0.0 {
        lines.push(format!("Duration: {}", format_duration(metadata.duration)));
    }
    if config.show_codec() {
        lines.push(format!(
            "Codec: {}",
            metadata.codec.as_deref().unwrap_or("Unknown")
        ));
    }
    lines
}

/// Height of a header holding `line_count` lines; 0 for no lines.
pub fn header_height(line_count: usize) -> u32 {
    if line_count == 0 {
        return 0;
    }
    line_count as u32 * HEADER_LINE_HEIGHT + 2 * HEADER_PADDING
}

/// Factor that fits a `grid_width × grid_height` grid inside
/// `columns * max_width × rows * max_height`, never above 1.0.
pub fn grid_scale_factor(grid_width: u32, grid_height: u32, config: &ProcessingConfig) -> f64 {
    let bounds = config.cell_box();
    let max_width = config.columns() as f64 * bounds.max_width as f64;
    let max_height = config.rows() as f64 * bounds.max_height as f64;
    if grid_width == 0 || grid_height == 0 {
        return 1.0;
    }
    (max_width / grid_width as f64)
        .min(max_height / grid_height as f64)
        .min(1.0)
}

/// Assembles frames into a labelled grid image.
#[derive(Debug)]
pub struct GridCompositor {
    text: TextRenderer,
    mode: CompositionMode,
    filter: ResizeFilter,
    watermark: Option<String>,
}

impl GridCompositor {
    /// Text drawn in the top-right corner of every sheet.
    pub const WATERMARK: &'static str = "ScreenMachine";

    /// A compositor using the first available system font.
    pub fn new() -> Self {
        Self::with_text_renderer(TextRenderer::load())
    }

    pub fn with_text_renderer(text: TextRenderer) -> Self {
        Self {
            text,
            mode: CompositionMode::default(),
            filter: ResizeFilter::default(),
            watermark: Some(Self::WATERMARK.to_string()),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CompositionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replace or (with `None`) remove the watermark.
    #[must_use]
    pub fn with_watermark(mut self, watermark: Option<String>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn mode(&self) -> CompositionMode {
        self.mode
    }

    /// Compose `samples` into one sheet.
    ///
    /// Missing cells are filled with black frames the size of the first
    /// sample (or of the configured cell box if there are no samples at all);
    /// surplus samples are ignored. `samples` is never modified.
    pub fn compose(
        &self,
        samples: &[FrameSample],
        config: &ProcessingConfig,
        metadata: Option<&VideoMetadata>,
    ) -> RgbImage {
        let columns = config.columns();
        let rows = config.rows();
        let cells = config.total_screenshots() as usize;
        let used = &samples[..samples.len().min(cells)];

        let grid = match self.mode {
            CompositionMode::ResizeOnce => self.grid_resize_once(used, config),
            CompositionMode::ResizeEach => self.grid_resize_each(used, config),
        };
        let cell_width = grid.width() / columns;
        let cell_height = grid.height() / rows;

        let lines = header_lines(config, metadata);
        let header = header_height(lines.len());

        let mut canvas = RgbImage::from_pixel(columns * cell_width, rows * cell_height + header, BLACK);
        imageops::replace(&mut canvas, &grid, 0, header as i64);

        if header > 0 {
            let header_rect = Rect::at(0, 0).of_size(canvas.width().max(1), header);
            draw_filled_rect_mut(
                &mut canvas,
                header_rect,
                HEADER_BACKGROUND,
            );
            let mut y = HEADER_PADDING;
            for line in &lines {
                self.text.draw(
                    &mut canvas,
                    HEADER_PADDING as i32,
                    y as i32,
                    HEADER_FONT_SIZE,
                    TEXT_COLOR,
                    line,
                );
                y += HEADER_LINE_HEIGHT;
            }
        }

        if config.show_timestamps() && !used.is_empty() {
            // Padding cells are labelled as frames at 0 s.
            let timestamps = used
                .iter()
                .map(|sample| sample.timestamp)
                .chain(iter::repeat(0.0))
                .take(cells);
            for (index, timestamp) in timestamps.enumerate() {
                let column = index as u32 % columns;
                let row = index as u32 / columns;
                let label = format_timestamp(timestamp);
                let (_, text_height) = self.text.measure(&label, TIMESTAMP_FONT_SIZE);
                let x = column * cell_width + TIMESTAMP_PADDING;
                let y = (header + (row + 1) * cell_height) as i64
                    - TIMESTAMP_PADDING as i64
                    - text_height as i64;
                self.text.draw(
                    &mut canvas,
                    x as i32,
                    y as i32,
                    TIMESTAMP_FONT_SIZE,
                    TEXT_COLOR,
                    &label,
                );
            }
        }

        if let Some(watermark) = &self.watermark {
            let (text_width, _) = self.text.measure(watermark, WATERMARK_FONT_SIZE);
            let x = canvas.width() as i64 - text_width as i64 - WATERMARK_PADDING as i64;
            self.text.draw(
                &mut canvas,
                x as i32,
                WATERMARK_PADDING as i32,
                WATERMARK_FONT_SIZE,
                WATERMARK_COLOR,
                watermark,
            );
        }

        canvas
    }

    /// Paste native-size frames, then scale the whole grid once.
    fn grid_resize_once(&self, samples: &[FrameSample], config: &ProcessingConfig) -> RgbImage {
        let (cell_width, cell_height) = samples
            .first()
            .map(FrameSample::dimensions)
            .unwrap_or((config.max_screenshot_width(), config.max_screenshot_height()));
        let frames = samples.iter().map(|sample| Cow::Borrowed(&sample.image));
        let full = paste_grid(frames, config, cell_width, cell_height);

        let scale = grid_scale_factor(full.width(), full.height(), config);
        if scale >= 1.0 {
            return full;
        }
        let width = ((full.width() as f64 * scale) as u32).max(config.columns());
        let height = ((full.height() as f64 * scale) as u32).max(config.rows());
        imageops::resize(&full, width, height, self.filter.to_filter_type())
    }

    /// Scale every frame into the cell box, then paste.
    fn grid_resize_each(&self, samples: &[FrameSample], config: &ProcessingConfig) -> RgbImage {
        let cell_box = config.cell_box();
        let filter = self.filter.to_filter_type();
        let (cell_width, cell_height) = samples
            .first()
            .map(|sample| {
                let (width, height) = sample.dimensions();
                cell_box.fit(width, height)
            })
            .unwrap_or((cell_box.max_width, cell_box.max_height));

        let frames = samples.iter().map(|sample| {
            let image = &sample.image;
            let (width, height) = cell_box.fit(image.width(), image.height());
            if (width, height) == image.dimensions() {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(imageops::resize(image, width, height, filter))
            }
        });
        paste_grid(frames, config, cell_width, cell_height)
    }
}

impl Default for GridCompositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Lay out `frames` on a black `columns × rows` grid of fixed-size cells.
/// Cells beyond the last frame stay black.
fn paste_grid<'a, I>(frames: I, config: &ProcessingConfig, cell_width: u32, cell_height: u32) -> RgbImage
where
    I: IntoIterator<Item = Cow<'a, RgbImage>>,
{
    let columns = config.columns();
    let mut grid = RgbImage::from_pixel(
        columns * cell_width,
        config.rows() * cell_height,
        BLACK,
    );
    for (index, image) in frames.into_iter().enumerate() {
        let x = (index as u32 % columns) * cell_width;
        let y = (index as u32 / columns) * cell_height;
        imageops::replace(&mut grid, image.as_ref(), x as i64, y as i64);
    }
    grid
}
