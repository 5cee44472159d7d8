//! Wireframe canvas used by the scripted page to produce real PNG
//! screenshots: boxes for structural regions, font8x8 text for headings.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use crate::harness::types::HarnessResult;

pub const BACKGROUND: [u8; 3] = [245, 246, 248];
pub const SIDEBAR: [u8; 3] = [40, 44, 52];
pub const TEXT: [u8; 3] = [20, 20, 20];
pub const ROW: [u8; 3] = [225, 229, 235];
pub const CARD: [u8; 3] = [255, 255, 255];
pub const ACCENT: [u8; 3] = [37, 99, 235];
pub const SCRIM: [u8; 3] = [90, 90, 90];

const GLYPH_PX: u32 = 8;

#[derive(Debug, Clone)]
pub struct Wireframe {
    canvas: RgbImage,
}

impl Wireframe {
    /// Black canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbImage::new(width, height),
        }
    }

    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            canvas: RgbImage::from_pixel(width, height, Rgb(color)),
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    /// Filled rectangle, clipped to the canvas
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        let right = x.saturating_add(w).min(self.width());
        let bottom = y.saturating_add(h).min(self.height());
        for py in y..bottom {
            for px in x..right {
                self.canvas.put_pixel(px, py, Rgb(color));
            }
        }
    }

    /// Single line of 8x8 glyphs; text past the right edge is dropped
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let columns = text.chars().zip((x..self.width()).step_by(GLYPH_PX as usize));
        for (ch, left) in columns {
            self.draw_glyph(left, y, ch, fg, bg);
        }
    }

    fn draw_glyph(&mut self, left: u32, top: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or_default();
        for (dy, bits) in (0u32..).zip(glyph) {
            for dx in 0..GLYPH_PX {
                let (px, py) = (left + dx, top + dy);
                if px >= self.width() || py >= self.height() {
                    continue;
                }
                // Least significant bit is the leftmost pixel
                let color = if bits & (1 << dx) != 0 { fg } else { bg };
                self.canvas.put_pixel(px, py, Rgb(color));
            }
        }
    }

    /// Pixel at `(x, y)`, black outside the canvas
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x < self.width() && y < self.height() {
            self.canvas.get_pixel(x, y).0
        } else {
            [0, 0, 0]
        }
    }

    pub fn to_png(&self) -> HarnessResult<Vec<u8>> {
        let mut bytes = Cursor::new(Vec::new());
        self.canvas.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_is_clipped_to_canvas() {
        let mut fb = Wireframe::with_color(20, 20, BACKGROUND);
        fb.draw_rect(15, 15, 100, 100, ACCENT);
        assert_eq!(fb.pixel(14, 14), BACKGROUND);
        assert_eq!(fb.pixel(19, 19), ACCENT);
        assert_eq!(fb.pixel(40, 40), [0, 0, 0]);
    }

    #[test]
    fn test_heading_text_lights_pixels() {
        let mut fb = Wireframe::with_color(80, 16, CARD);
        fb.draw_text(0, 0, "Users", TEXT, CARD);
        let lit = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .any(|(x, y)| fb.pixel(x, y) == TEXT);
        assert!(lit);
    }

    #[test]
    fn test_png_encoding() {
        let mut fb = Wireframe::new(32, 32);
        fb.draw_rect(0, 0, 32, 8, SIDEBAR);
        let png = fb.to_png().unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
        assert_eq!(decoded.get_pixel(4, 4).0, SIDEBAR);
    }
}
