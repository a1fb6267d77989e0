//! # Artificial Horizon
//!
//! Attitude indicator drawn in the bottom-right corner of the frame.
//!
//! The sky/ground backdrop is drawn on a square 1.5x the instrument size so
//! that it still covers the whole instrument after rotation at any roll angle.
//! The backdrop is rotated about its center and the middle `size x size`
//! square is kept as the instrument face.

use tiny_skia::{FilterQuality, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform};
use tracing::info;

use super::frame::{new_pixmap, solid_paint};
use super::{palette, Canvas, Color, Point, Rect, TextStyle};
use crate::error::Result;

/// Pitch ladder spacing in degrees
const LADDER_STEP: i32 = 5;
/// Bank angle marks on the top arc, degrees either side of vertical
const BANK_MARKS: [f32; 5] = [10.0, 20.0, 30.0, 45.0, 60.0];

const BOOT_BANNER: &str = "HUD SYSTEM ONLINE";

/// Artificial horizon renderer
#[derive(Debug)]
pub struct ArtificialHorizonRenderer {
    size: u32,
    pitch_scale: f32,
    start_x: i32,
    start_y: i32,
    boot_frames_left: u32,
}

impl ArtificialHorizonRenderer {
    /// Place a `size` pixel instrument `margin` pixels from the bottom-right
    /// corner of a `frame_width x frame_height` frame.
    #[must_use]
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        size: u32,
        margin: u32,
        pitch_scale: f32,
        boot_banner_frames: u32,
    ) -> Self {
        let start_x = frame_width.saturating_sub(size + margin);
        let start_y = frame_height.saturating_sub(size + margin);
        Self {
            size,
            pitch_scale,
            start_x: i32::try_from(start_x).unwrap_or(i32::MAX),
            start_y: i32::try_from(start_y).unwrap_or(i32::MAX),
            boot_frames_left: boot_banner_frames,
        }
    }

    /// Top-left corner of the instrument in frame pixels
    #[must_use]
    pub fn origin(&self) -> (i32, i32) {
        (self.start_x, self.start_y)
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Frames left before the boot banner disappears
    #[must_use]
    pub fn boot_frames_left(&self) -> u32 {
        self.boot_frames_left
    }

    fn backdrop_size(&self) -> u32 {
        self.size * 3 / 2
    }

    fn crop_offset(&self) -> f32 {
        ((self.backdrop_size() - self.size) / 2) as f32
    }

    /// Row of the horizon line on the backdrop
    fn horizon_row(&self, pitch: f32) -> i32 {
        let bg = self.backdrop_size() as i32;
        let displacement = (pitch * self.pitch_scale) as i32;
        (bg / 2).saturating_add(displacement).clamp(0, bg)
    }

    /// Ladder rungs visible on the backdrop as (angle, row)
    fn ladder(&self, horizon_row: i32) -> impl Iterator<Item = (i32, i32)> + '_ {
        let bg = self.backdrop_size() as i32;
        (-90..=90)
            .step_by(LADDER_STEP as usize)
            .filter(|angle| *angle != 0)
            .map(move |angle| (angle, horizon_row.saturating_sub((angle as f32 * self.pitch_scale) as i32)))
            .filter(move |(_, row)| *row > 0 && *row < bg)
    }

    fn rung_half_length(angle: i32) -> f32 {
        if angle % 10 == 0 {
            50.0
        } else {
            25.0
        }
    }

    /// Unrotated sky/ground backdrop
    fn render_backdrop(&self, pitch: f32) -> Result<Pixmap> {
        let bg = self.backdrop_size();
        let bg_f = bg as f32;
        let half = bg_f / 2.0;
        let horizon = self.horizon_row(pitch);

        let mut backdrop = new_pixmap(bg, bg)?;
        backdrop.fill(tiny_skia::Color::from_rgba8(palette::SKY.0, palette::SKY.1, palette::SKY.2, 255));

        if let Some(ground) = tiny_skia::Rect::from_xywh(0.0, horizon as f32, bg_f, bg_f - horizon as f32) {
            backdrop.fill_rect(ground, &solid_paint(palette::GROUND, 255, false), Transform::identity(), None);
        }

        stroke_segment(&mut backdrop, (0.0, horizon as f32), (bg_f, horizon as f32), palette::WHITE, 2.0);

        for (angle, row) in self.ladder(horizon) {
            let len = Self::rung_half_length(angle);
            let y = row as f32 + 0.5;
            stroke_segment(&mut backdrop, (half - len, y), (half + len, y), palette::WHITE, 1.0);
        }

        Ok(backdrop)
    }

    /// Render the rotated, cropped instrument face.
    ///
    /// The horizon moves down by `pitch * pitch_scale` pixels for positive
    /// pitch and the backdrop turns clockwise on screen for positive roll.
    ///
    /// # Errors
    ///
    /// Returns `Render` if the surfaces cannot be allocated.
    pub fn render_instrument(&self, roll: f32, pitch: f32) -> Result<Pixmap> {
        let backdrop = self.render_backdrop(pitch)?;
        let center = self.backdrop_size() as f32 / 2.0;
        let crop = self.crop_offset();

        let mut face = new_pixmap(self.size, self.size)?;
        let paint = PixmapPaint {
            quality: FilterQuality::Nearest,
            ..PixmapPaint::default()
        };
        let transform = Transform::from_rotate_at(roll, center, center).post_translate(-crop, -crop);
        face.draw_pixmap(0, 0, backdrop.as_ref(), &paint, transform, None);

        Ok(face)
    }

    /// Map a backdrop point to frame pixels after rotation and crop
    fn backdrop_to_frame(&self, roll: f32, x: f32, y: f32) -> Point {
        let center = self.backdrop_size() as f32 / 2.0;
        let (sin, cos) = roll.to_radians().sin_cos();
        let (dx, dy) = (x - center, y - center);
        let crop = self.crop_offset();
        Point::new(
            center + dx * cos - dy * sin - crop + self.start_x as f32,
            center + dx * sin + dy * cos - crop + self.start_y as f32,
        )
    }

    /// Draw the complete instrument onto the canvas.
    ///
    /// Counts down the boot banner by one frame.
    ///
    /// # Errors
    ///
    /// Returns `Render` if the instrument surfaces cannot be allocated.
    pub fn draw<C: Canvas + ?Sized>(&mut self, canvas: &mut C, roll: f32, pitch: f32) -> Result<()> {
        let face = self.render_instrument(roll, pitch)?;
        canvas.blit(&face, self.start_x, self.start_y);

        let size = self.size as f32;
        let (x0, y0) = (self.start_x as f32, self.start_y as f32);
        let (cx, cy) = (x0 + (self.size / 2) as f32, y0 + (self.size / 2) as f32);

        // Pitch ladder numbers, rotated with the face
        let label_style = TextStyle::new(palette::WHITE, 0.5, 1);
        let half = self.backdrop_size() as f32 / 2.0;
        for (angle, row) in self.ladder(self.horizon_row(pitch)).filter(|(a, _)| a % 10 == 0) {
            let anchor_x = half - Self::rung_half_length(angle) - 30.0;
            let origin = self.backdrop_to_frame(roll, anchor_x, row.saturating_add(5) as f32);
            let inside = origin.x >= x0 && origin.x < x0 + size && origin.y >= y0 && origin.y < y0 + size;
            if inside {
                canvas.text(&angle.abs().to_string(), origin, label_style);
            }
        }

        // Bank scale
        canvas.line(Point::new(cx, y0), Point::new(cx, y0 + 15.0), palette::WHITE, 2.0);
        let radius = (self.size / 2) as f32 - 10.0;
        for mark in BANK_MARKS {
            let (sin, cos) = mark.to_radians().sin_cos();
            for sign in [-1.0, 1.0] {
                let outer = Point::new((cx + sign * radius * sin).trunc(), (cy - radius * cos).trunc());
                let inner = Point::new(
                    (cx + sign * (radius - 10.0) * sin).trunc(),
                    (cy - (radius - 10.0) * cos).trunc(),
                );
                canvas.line(outer, inner, palette::WHITE, 2.0);
            }
        }

        canvas.stroke_rect(Rect::new(x0, y0, size, size), palette::WHITE, 2.0);

        // Aircraft reference symbol
        canvas.line(Point::new(cx - 40.0, cy), Point::new(cx - 20.0, cy), palette::YELLOW, 2.0);
        canvas.line(Point::new(cx + 20.0, cy), Point::new(cx + 40.0, cy), palette::YELLOW, 2.0);
        canvas.fill_circle(Point::new(cx, cy), 5.0, palette::YELLOW);

        if self.boot_frames_left > 0 {
            let style = TextStyle::new(palette::GREEN, 0.6, 2);
            let (text_w, _) = style.extent(BOOT_BANNER);
            let origin = Point::new((x0 + (size - text_w) / 2.0).floor(), y0 - 15.0);
            canvas.text(BOOT_BANNER, origin, style);

            self.boot_frames_left -= 1;
            if self.boot_frames_left == 0 {
                info!("Boot banner finished");
            }
        }

        Ok(())
    }
}

fn stroke_segment(pixmap: &mut Pixmap, from: (f32, f32), to: (f32, f32), color: Color, width: f32) {
    let mut pb = PathBuilder::new();
    pb.move_to(from.0, from.1);
    pb.line_to(to.0, to.1);
    if let Some(path) = pb.finish() {
        let stroke = Stroke { width, ..Stroke::default() };
        pixmap.stroke_path(&path, &solid_paint(color, 255, false), &stroke, Transform::identity(), None);
    }
}
