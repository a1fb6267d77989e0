//! # Obstacle Proximity Sensor
//!
//! Estimates how much of the view straight ahead is blocked and draws the
//! proximity bar, corner indicators and critical banner.
//!
//! The estimate is the area enclosed by dark blobs in a central region of
//! interest (one third of the frame in each dimension). Anything close to the
//! camera tends to be underexposed, so a large dark area means an obstacle
//! ahead.

use image::{imageops, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{threshold_mut, ThresholdType};
use imageproc::geometry::contour_area;
use tracing::{debug, warn};

use super::{palette, Canvas, Color, Point, Rect, TextStyle};

/// Gray level at or below which a pixel counts as occupied
const DARK_LEVEL: u8 = 60;
/// Sigma of the 5x5 Gaussian smoothing applied before thresholding
const BLUR_SIGMA: f32 = 1.1;

const BAR_X: f32 = 10.0;
const BAR_Y: f32 = 100.0;
const BAR_WIDTH: f32 = 200.0;
const BAR_HEIGHT: f32 = 20.0;

const CORNER_SIZE: f32 = 30.0;
const CORNER_MARGIN: f32 = 10.0;

/// Region of interest in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Alert tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityTier {
    Safe,
    Warning,
    Danger,
}

impl ProximityTier {
    #[must_use]
    pub fn color(self) -> Color {
        match self {
            ProximityTier::Safe => palette::GREEN,
            ProximityTier::Warning => palette::YELLOW,
            ProximityTier::Danger => palette::RED,
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityReading {
    /// Occupancy in [0, 1]
    pub danger_level: f32,
    pub tier: ProximityTier,
    /// `tier == Danger`
    pub critical: bool,
    /// Danger was entered on this evaluation
    pub entered_critical: bool,
}

/// Obstacle proximity sensor
#[derive(Debug)]
pub struct ObstacleProximitySensor {
    roi: Roi,
    danger_threshold: f32,
    warning_threshold: f32,
    last_tier: ProximityTier,
}

impl ObstacleProximitySensor {
    /// Create a sensor for frames of the given size.
    ///
    /// The warning threshold is half of `danger_threshold`.
    #[must_use]
    pub fn new(frame_width: u32, frame_height: u32, danger_threshold: f32) -> Self {
        let width = frame_width / 3;
        let height = frame_height / 3;
        Self {
            roi: Roi {
                x: (frame_width - width) / 2,
                y: (frame_height - height) / 2,
                width,
                height,
            },
            danger_threshold,
            warning_threshold: danger_threshold * 0.5,
            last_tier: ProximityTier::Safe,
        }
    }

    #[must_use]
    pub fn roi(&self) -> Roi {
        self.roi
    }

    #[must_use]
    pub fn danger_threshold(&self) -> f32 {
        self.danger_threshold
    }

    #[must_use]
    pub fn warning_threshold(&self) -> f32 {
        self.warning_threshold
    }

    /// Classify an occupancy ratio.
    ///
    /// Out-of-range ratios are clamped; NaN counts as empty.
    pub fn evaluate(&mut self, occupancy_ratio: f32) -> ProximityReading {
        let danger_level = if occupancy_ratio.is_nan() {
            0.0
        } else {
            occupancy_ratio.clamp(0.0, 1.0)
        };

        let tier = if danger_level > self.danger_threshold {
            ProximityTier::Danger
        } else if danger_level > self.warning_threshold {
            ProximityTier::Warning
        } else {
            ProximityTier::Safe
        };

        let critical = tier == ProximityTier::Danger;
        let entered_critical = critical && self.last_tier != ProximityTier::Danger;
        if tier != self.last_tier {
            debug!("Proximity tier {:?} -> {:?} ({:.2})", self.last_tier, tier, danger_level);
        }
        self.last_tier = tier;

        ProximityReading {
            danger_level,
            tier,
            critical,
            entered_critical,
        }
    }

    /// Draw the bar, corner indicators and (at Danger) the critical banner
    pub fn draw<C: Canvas + ?Sized>(&self, canvas: &mut C, reading: &ProximityReading) {
        let w = canvas.width() as f32;
        let h = canvas.height() as f32;
        let level = reading.danger_level;

        // Bar
        let bar = Rect::new(BAR_X, BAR_Y, BAR_WIDTH, BAR_HEIGHT);
        canvas.fill_rect(bar, palette::DARK_GRAY);
        let fill = Color((255.0 * level) as u8, (255.0 * (1.0 - level)) as u8, 0);
        let fill_width = (BAR_WIDTH * level).trunc();
        if fill_width > 0.0 {
            canvas.fill_rect(Rect::new(BAR_X, BAR_Y, fill_width, BAR_HEIGHT), fill);
        }
        canvas.stroke_rect(bar, palette::LIGHT_GRAY, 1.0);
        canvas.text(
            &format!("Proximity: {}%", (level * 100.0) as u32),
            Point::new(BAR_X, BAR_Y - 10.0),
            TextStyle::new(palette::WHITE, 0.5, 1),
        );

        // Corners
        let indicator = if reading.tier == ProximityTier::Safe {
            palette::DARK_GRAY
        } else {
            reading.tier.color()
        };
        let (near, far) = (CORNER_MARGIN, CORNER_MARGIN + CORNER_SIZE);
        let corners = [
            [Point::new(near, far), Point::new(near, near), Point::new(far, near)],
            [Point::new(w - far, near), Point::new(w - near, near), Point::new(w - near, far)],
            [Point::new(near, h - far), Point::new(near, h - near), Point::new(far, h - near)],
            [Point::new(w - far, h - near), Point::new(w - near, h - near), Point::new(w - near, h - far)],
        ];
        for triangle in &corners {
            canvas.fill_polygon(triangle, indicator);
        }

        if reading.critical {
            let text = "CRITICAL ALERT!";
            let style = TextStyle::new(palette::RED, 1.2, 3);
            let (text_w, text_h) = style.extent(text);
            let origin = Point::new((w / 2.0 - text_w / 2.0).floor(), (h / 2.0 + 50.0).floor());

            let panel = Rect::new(origin.x - 20.0, origin.y - text_h - 20.0, text_w + 40.0, text_h + 40.0);
            canvas.blend_rect(panel, palette::BLACK, 0.5);
            canvas.text(text, origin, style);
        }
    }

    /// Estimate occupancy from `image`, classify it and draw the result
    pub fn detect<C: Canvas + ?Sized>(&mut self, image: &RgbImage, canvas: &mut C) -> ProximityReading {
        let ratio = occupancy_ratio(image, self.roi);
        let reading = self.evaluate(ratio);
        self.draw(canvas, &reading);
        reading
    }
}

/// Fraction of `roi` enclosed by dark blobs, in [0, 1].
///
/// The region is smoothed and thresholded, then the areas inside the outermost
/// borders of the dark blobs are summed. Bright holes inside a blob count as
/// occupied. Areas are measured between border pixel centers, so a fully dark
/// region reads slightly under 1.
///
/// Returns 0 when the region does not overlap the image.
#[must_use]
pub fn occupancy_ratio(image: &RgbImage, roi: Roi) -> f32 {
    let region = imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image();
    let area = u64::from(region.width()) * u64::from(region.height());
    if area == 0 {
        warn!("Proximity region {:?} is outside the {}x{} frame", roi, image.width(), image.height());
        return 0.0;
    }

    let gray = imageops::grayscale(&region);
    let mut mask = imageops::blur(&gray, BLUR_SIGMA);
    threshold_mut(&mut mask, DARK_LEVEL, ThresholdType::BinaryInverted);

    let occupied: f64 = find_contours::<i32>(&mask)
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .map(|contour| contour_area(&contour.points))
        .sum();

    (occupied / area as f64).clamp(0.0, 1.0) as f32
}
