//! # HUD Module
//!
//! Overlays composited onto each video frame.
//!
//! This module handles:
//! - The [`Canvas`] drawing surface the overlays render through
//! - A tiny-skia backed frame implementing it ([`frame`])
//! - Ground proximity alerts ([`ground`])
//! - Obstacle proximity alerts ([`proximity`])
//! - The artificial horizon instrument ([`horizon`])

pub mod frame;
pub mod ground;
pub mod horizon;
pub mod proximity;

use tiny_skia::Pixmap;

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u8, pub u8, pub u8);

/// HUD palette
pub mod palette {
    use super::Color;

    pub const WHITE: Color = Color(255, 255, 255);
    pub const BLACK: Color = Color(0, 0, 0);
    pub const GREEN: Color = Color(0, 255, 0);
    pub const YELLOW: Color = Color(255, 255, 0);
    pub const RED: Color = Color(255, 0, 0);
    pub const DARK_GRAY: Color = Color(50, 50, 50);
    pub const LIGHT_GRAY: Color = Color(200, 200, 200);
    pub const SKY: Color = Color(0, 127, 255);
    pub const GROUND: Color = Color(170, 85, 0);
}

/// Point in frame pixels, origin top-left, y down
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two corners given in any order
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }
}

/// Nominal HUD font advance per character at scale 1.0
const GLYPH_ADVANCE: f32 = 20.0;
/// Nominal HUD font cap height at scale 1.0
const GLYPH_HEIGHT: f32 = 22.0;

/// Text appearance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub color: Color,
    pub scale: f32,
    pub thickness: u8,
}

impl TextStyle {
    #[must_use]
    pub fn new(color: Color, scale: f32, thickness: u8) -> Self {
        Self { color, scale, thickness }
    }

    /// Width and height the text occupies, used for centering and backing panels.
    #[must_use]
    pub fn extent(&self, text: &str) -> (f32, f32) {
        let chars = text.chars().count() as f32;
        let bold = f32::from(self.thickness.saturating_sub(1));
        (
            chars * GLYPH_ADVANCE * self.scale + bold,
            GLYPH_HEIGHT * self.scale + bold,
        )
    }
}

/// Drawing surface the HUD renders into.
///
/// Text origins are the bottom-left corner of the text baseline.
pub trait Canvas {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn fill_rect(&mut self, rect: Rect, color: Color);

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32);

    /// Fill `rect` with `color` at the given opacity (0.0 = invisible, 1.0 = opaque)
    fn blend_rect(&mut self, rect: Rect, color: Color, alpha: f32);

    fn line(&mut self, from: Point, to: Point, color: Color, width: f32);

    fn fill_circle(&mut self, center: Point, radius: f32, color: Color);

    fn fill_polygon(&mut self, points: &[Point], color: Color);

    fn text(&mut self, text: &str, origin: Point, style: TextStyle);

    /// Copy `image` onto the canvas with its top-left corner at (`x`, `y`)
    fn blit(&mut self, image: &Pixmap, x: i32, y: i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_from_corners() {
        let rect = Rect::from_corners(Point::new(50.0, 10.0), Point::new(20.0, 40.0));
        assert_eq!(rect, Rect::new(20.0, 10.0, 30.0, 30.0));
    }

    #[test]
    fn test_text_extent_scales() {
        let style = TextStyle::new(palette::WHITE, 1.0, 1);
        assert_eq!(style.extent("ABCD"), (80.0, 22.0));

        let big = TextStyle::new(palette::WHITE, 2.0, 3);
        assert_eq!(big.extent("AB"), (82.0, 46.0));
    }

    #[test]
    fn test_text_extent_counts_chars_not_bytes() {
        let style = TextStyle::new(palette::WHITE, 1.0, 1);
        assert_eq!(style.extent("¡!").0, 40.0);
    }
}
