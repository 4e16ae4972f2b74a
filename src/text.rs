//! Text drawing for grid labels.
//!
//! [`TextRenderer`] draws with the first TrueType font it finds among a few
//! well-known system locations, via `ab_glyph` and `imageproc`. Without one
//! it falls back to the 8×8 bitmap glyphs from `font8x8`, scaled by an
//! integer factor to approximate the requested size.

use std::{fs, path::Path};

use ab_glyph::{FontVec, PxScale};
use font8x8::{BASIC_FONTS, LATIN_FONTS, UnicodeFonts};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::error::ScreenMachineError;

const FONT_CANDIDATES: &[&str] = &[
    "arial.ttf",
    "Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
];

const GLYPH_SIZE: u32 = 8;

/// Draws single-line text onto RGB images.
#[derive(Debug)]
pub struct TextRenderer {
    font: Option<FontVec>,
}

impl TextRenderer {
    /// Use the first system font that loads, or the built-in bitmap font.
    pub fn load() -> Self {
        for candidate in FONT_CANDIDATES {
            if let Ok(renderer) = Self::from_path(candidate) {
                log::debug!("Using font {candidate}");
                return renderer;
            }
        }
        log::debug!("No TrueType font found; using the built-in bitmap font");
        Self::builtin()
    }

    /// Always use the built-in 8×8 bitmap font.
    pub fn builtin() -> Self {
        Self { font: None }
    }

    /// Load a TrueType or OpenType font (first face of a collection).
    ///
    /// # Errors
    ///
    /// Returns [`ScreenMachineError::IoError`] if the file cannot be read and
    /// [`ScreenMachineError::ConfigInvalid`] if it is not a usable font.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ScreenMachineError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let font = FontVec::try_from_vec_and_index(data, 0).map_err(|error| {
            ScreenMachineError::ConfigInvalid(format!("{}: {error}", path.display()))
        })?;
        Ok(Self { font: Some(font) })
    }

    /// `true` when a TrueType font is in use.
    pub fn is_truetype(&self) -> bool {
        self.font.is_some()
    }

    /// Width and height of `text` at `size` pixels.
    pub fn measure(&self, text: &str, size: f32) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(PxScale::from(size), font, text),
            None => {
                let scale = bitmap_scale(size);
                let glyphs = text.chars().count() as u32;
                (glyphs * GLYPH_SIZE * scale, GLYPH_SIZE * scale)
            }
        }
    }

    /// Draw `text` with its top-left corner at `(x, y)`. Pixels outside the
    /// canvas are clipped.
    pub fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, size: f32, color: Rgb<u8>, text: &str) {
        match &self.font {
            Some(font) => draw_text_mut(canvas, color, x, y, PxScale::from(size), font, text),
            None => draw_bitmap_text(canvas, x, y, bitmap_scale(size), color, text),
        }
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::load()
    }
}

fn bitmap_scale(size: f32) -> u32 {
    ((size / GLYPH_SIZE as f32).round() as u32).max(1)
}

fn glyph(character: char) -> [u8; 8] {
    BASIC_FONTS
        .get(character)
        .or_else(|| LATIN_FONTS.get(character))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

fn draw_bitmap_text(canvas: &mut RgbImage, x: i32, y: i32, scale: u32, color: Rgb<u8>, text: &str) {
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);
    let advance = (GLYPH_SIZE * scale) as i64;

    for (index, character) in text.chars().enumerate() {
        let origin_x = x as i64 + index as i64 * advance;
        for (row, bits) in glyph(character).iter().enumerate() {
            for column in 0..GLYPH_SIZE as i64 {
                if bits & (1 << column) == 0 {
                    continue;
                }
                for dy in 0..scale as i64 {
                    for dx in 0..scale as i64 {
                        let px = origin_x + column * scale as i64 + dx;
                        let py = y as i64 + row as i64 * scale as i64 + dy;
                        if (0..width).contains(&px) && (0..height).contains(&py) {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}
