//! # HUD Frame
//!
//! A [`Canvas`] backed by a `tiny_skia::Pixmap`.
//!
//! Shapes are rasterized straight into the pixmap. Text is laid out as a
//! one-element SVG document and rendered with resvg at the moment it is drawn,
//! so it stacks over any panel painted before it. Every label is also recorded
//! ([`TextLabel`]) for inspection.

use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform};
use tracing::warn;
use usvg::fontdb;

use super::{Canvas, Color, Point, Rect, TextStyle};
use crate::error::{HudError, Result};

/// Font family used for all HUD text
const HUD_FONT_FAMILY: &str = "DejaVu Sans";
/// SVG font size in pixels per unit of [`TextStyle::scale`]
const FONT_SIZE_PER_SCALE: f32 = 30.0;

/// A piece of text placed on the frame
#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    pub text: String,
    pub origin: Point,
    pub style: TextStyle,
}

/// Solid paint for `color` at `alpha` (0-255)
#[must_use]
pub fn solid_paint(color: Color, alpha: u8, anti_alias: bool) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.0, color.1, color.2, alpha);
    paint.anti_alias = anti_alias;
    paint
}

/// Allocate a pixmap, turning allocation failure into a render error
pub fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width, height)
        .ok_or_else(|| HudError::Render(format!("Cannot allocate {}x{} surface", width, height)))
}

/// Read one pixel of a pixmap as straight RGB
#[must_use]
pub fn pixmap_color(pixmap: &Pixmap, x: u32, y: u32) -> Option<Color> {
    pixmap.pixel(x, y).map(|p| {
        let c = p.demultiply();
        Color(c.red(), c.green(), c.blue())
    })
}

/// System fonts, loaded once per process
fn font_database() -> Arc<fontdb::Database> {
    static FONTS: OnceLock<Arc<fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = fontdb::Database::new();
            db.load_system_fonts();
            if db.is_empty() {
                warn!("No system fonts found, HUD text will not be visible");
            }
            Arc::new(db)
        })
        .clone()
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// SVG document holding a single text element on a `width x height` canvas.
///
/// `origin` is the left end of the baseline. Thickness above 1 becomes an
/// outline stroke in the fill color.
fn text_svg(width: u32, height: u32, text: &str, origin: Point, style: TextStyle) -> String {
    let Color(r, g, b) = style.color;
    let color = format!("#{:02x}{:02x}{:02x}", r, g, b);
    let stroke_width = f32::from(style.thickness.saturating_sub(1));

    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}"><text x="{}" y="{}" font-family="{}, sans-serif" font-size="{}" fill="{}" stroke="{}" stroke-width="{}">{}</text></svg>"#,
        width,
        height,
        origin.x,
        origin.y,
        HUD_FONT_FAMILY,
        style.scale * FONT_SIZE_PER_SCALE,
        color,
        if stroke_width > 0.0 { color.as_str() } else { "none" },
        stroke_width,
        escape_xml(text)
    )
}

/// Rasterize `text` onto `pixmap` with its baseline starting at `origin`
///
/// # Errors
///
/// Returns `Render` if the text cannot be laid out.
pub fn render_text(pixmap: &mut Pixmap, text: &str, origin: Point, style: TextStyle) -> Result<()> {
    let svg = text_svg(pixmap.width(), pixmap.height(), text, origin, style);

    let mut options = usvg::Options::default();
    options.fontdb = font_database();
    options.font_family = HUD_FONT_FAMILY.to_string();

    let tree = usvg::Tree::from_str(&svg, &options)
        .map_err(|e| HudError::Render(format!("Cannot lay out text {:?}: {}", text, e)))?;
    resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());
    Ok(())
}

/// Video frame with HUD overlays
pub struct HudFrame {
    pixmap: Pixmap,
    labels: Vec<TextLabel>,
}

impl std::fmt::Debug for HudFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HudFrame")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .field("labels", &self.labels.len())
            .finish()
    }
}

impl HudFrame {
    /// Opaque black frame
    ///
    /// # Errors
    ///
    /// Returns `Render` if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let mut pixmap = new_pixmap(width, height)?;
        pixmap.fill(tiny_skia::Color::BLACK);
        Ok(Self {
            pixmap,
            labels: Vec::new(),
        })
    }

    /// Frame initialised from a decoded video image
    ///
    /// # Errors
    ///
    /// Returns `Render` if the image is empty.
    pub fn from_rgb(image: &RgbImage) -> Result<Self> {
        let mut pixmap = new_pixmap(image.width(), image.height())?;
        for (dst, src) in pixmap.data_mut().chunks_exact_mut(4).zip(image.pixels()) {
            dst[0] = src[0];
            dst[1] = src[1];
            dst[2] = src[2];
            dst[3] = u8::MAX;
        }
        Ok(Self {
            pixmap,
            labels: Vec::new(),
        })
    }

    /// Frame as an RGB image
    #[must_use]
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.pixmap.width(), self.pixmap.height(), |x, y| {
            let Color(r, g, b) = pixmap_color(&self.pixmap, x, y).unwrap_or(Color(0, 0, 0));
            Rgb([r, g, b])
        })
    }

    /// Write the frame as PNG
    ///
    /// # Errors
    ///
    /// Returns `Image` if encoding or writing fails.
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_rgb().save(path)?;
        Ok(())
    }

    #[must_use]
    pub fn labels(&self) -> &[TextLabel] {
        &self.labels
    }

    /// Whether any label contains `needle`
    #[must_use]
    pub fn has_text(&self, needle: &str) -> bool {
        self.labels.iter().any(|label| label.text.contains(needle))
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        pixmap_color(&self.pixmap, x, y)
    }

    #[must_use]
    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    fn skia_rect(rect: Rect) -> Option<tiny_skia::Rect> {
        tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.width, rect.height)
    }
}

impl Canvas for HudFrame {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.blend_rect(rect, color, 1.0);
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32) {
        if let Some(r) = Self::skia_rect(rect) {
            let path = PathBuilder::from_rect(r);
            let stroke = Stroke { width, ..Stroke::default() };
            self.pixmap.stroke_path(
                &path,
                &solid_paint(color, u8::MAX, false),
                &stroke,
                Transform::identity(),
                None,
            );
        }
    }

    fn blend_rect(&mut self, rect: Rect, color: Color, alpha: f32) {
        if let Some(r) = Self::skia_rect(rect) {
            let alpha = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
            self.pixmap
                .fill_rect(r, &solid_paint(color, alpha, false), Transform::identity(), None);
        }
    }

    fn line(&mut self, from: Point, to: Point, color: Color, width: f32) {
        let mut pb = PathBuilder::new();
        pb.move_to(from.x, from.y);
        pb.line_to(to.x, to.y);
        if let Some(path) = pb.finish() {
            let stroke = Stroke { width, ..Stroke::default() };
            self.pixmap.stroke_path(
                &path,
                &solid_paint(color, u8::MAX, true),
                &stroke,
                Transform::identity(),
                None,
            );
        }
    }

    fn fill_circle(&mut self, center: Point, radius: f32, color: Color) {
        if let Some(path) = PathBuilder::from_circle(center.x, center.y, radius) {
            self.pixmap.fill_path(
                &path,
                &solid_paint(color, u8::MAX, true),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
    }

    fn fill_polygon(&mut self, points: &[Point], color: Color) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };

        let mut pb = PathBuilder::new();
        pb.move_to(first.x, first.y);
        for p in rest {
            pb.line_to(p.x, p.y);
        }
        pb.close();

        if let Some(path) = pb.finish() {
            self.pixmap.fill_path(
                &path,
                &solid_paint(color, u8::MAX, false),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
    }

    fn text(&mut self, text: &str, origin: Point, style: TextStyle) {
        if let Err(e) = render_text(&mut self.pixmap, text, origin, style) {
            warn!("{}", e);
        }
        self.labels.push(TextLabel {
            text: text.to_string(),
            origin,
            style,
        });
    }

    fn blit(&mut self, image: &Pixmap, x: i32, y: i32) {
        self.pixmap.draw_pixmap(
            x,
            y,
            image.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }
}

/// Pixels inside `rect` whose color satisfies `matches`
#[cfg(test)]
pub(crate) fn count_pixels(frame: &HudFrame, rect: Rect, matches: impl Fn(Color) -> bool) -> usize {
    let (x0, y0) = (rect.x.max(0.0) as u32, rect.y.max(0.0) as u32);
    let x1 = ((rect.x + rect.width).max(0.0) as u32).min(frame.width());
    let y1 = ((rect.y + rect.height).max(0.0) as u32).min(frame.height());
    (y0..y1)
        .flat_map(|y| (x0..x1).map(move |x| (x, y)))
        .filter(|&(x, y)| frame.pixel(x, y).is_some_and(&matches))
        .count()
}

/// Pixels of exactly `color` inside `rect`
#[cfg(test)]
pub(crate) fn count_color(frame: &HudFrame, rect: Rect, color: Color) -> usize {
    count_pixels(frame, rect, |c| c == color)
}
