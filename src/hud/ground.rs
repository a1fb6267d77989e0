//! # Ground Proximity Alert
//!
//! Altitude readout with a blinking "PULL UP" warning near the ground.
//!
//! | Height | Display |
//! |--------|---------|
//! | `<= critical` | Blinking "PULL UP" on a dark panel, centered |
//! | `<= warning` | Yellow "LOW ALTITUDE: x.x m" |
//! | above | White "Altitude: x.x m" |

use tracing::debug;

use super::{palette, Canvas, Point, Rect, TextStyle};

/// Padding around the PULL UP text inside its backing panel
const PANEL_PADDING: f32 = 20.0;
/// Opacity of the PULL UP backing panel
const PANEL_ALPHA: f32 = 0.6;
/// Distance of the altitude readout from the bottom-left corner
const READOUT_INSET: f32 = 10.0;
const READOUT_BOTTOM: f32 = 20.0;

/// Visual state selected for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroundAlert {
    /// Below the critical height. `visible` is the blink phase.
    PullUp { visible: bool },
    /// Between critical and warning height
    LowAltitude { meters: f32 },
    /// Above warning height
    Normal { meters: f32 },
}

/// Ground proximity state machine
#[derive(Debug)]
pub struct GroundProximityAlert {
    critical_dm: u32,
    warning_dm: u32,
    blink_period: u64,
    blink_counter: u64,
}

impl GroundProximityAlert {
    /// Create an alert with thresholds in decimeters.
    ///
    /// `blink_period` is the full on+off cycle in ticks; the text is shown for
    /// the first half of each cycle.
    #[must_use]
    pub fn new(critical_dm: u32, warning_dm: u32, blink_period: u64) -> Self {
        Self {
            critical_dm,
            warning_dm,
            blink_period: blink_period.max(2),
            blink_counter: 0,
        }
    }

    /// Ticks spent at or below the critical height so far.
    ///
    /// Not reset when altitude is regained.
    #[must_use]
    pub fn blink_counter(&self) -> u64 {
        self.blink_counter
    }

    /// Select the visual state for the current height sample
    pub fn update(&mut self, height_dm: u32) -> GroundAlert {
        let meters = height_dm as f32 / 10.0;

        if height_dm <= self.critical_dm {
            self.blink_counter += 1;
            let period = self.blink_period;
            let visible = self.blink_counter % period < period / 2;
            debug!("Ground critical at {} dm, blink {}", height_dm, self.blink_counter);
            GroundAlert::PullUp { visible }
        } else if height_dm <= self.warning_dm {
            GroundAlert::LowAltitude { meters }
        } else {
            GroundAlert::Normal { meters }
        }
    }

    /// Draw `alert` onto the canvas
    pub fn draw<C: Canvas + ?Sized>(&self, canvas: &mut C, alert: &GroundAlert) {
        let w = canvas.width() as f32;
        let h = canvas.height() as f32;

        match *alert {
            GroundAlert::PullUp { visible: false } => {}
            GroundAlert::PullUp { visible: true } => {
                let text = "PULL UP";
                let style = TextStyle::new(palette::RED, 1.8, 3);
                let (text_w, text_h) = style.extent(text);
                let origin = Point::new(((w - text_w) / 2.0).floor(), ((h + text_h) / 2.0).floor());

                let panel = Rect::from_corners(
                    Point::new(origin.x - PANEL_PADDING, origin.y + PANEL_PADDING),
                    Point::new(origin.x + text_w + PANEL_PADDING, origin.y - text_h - PANEL_PADDING),
                );
                canvas.blend_rect(panel, palette::BLACK, PANEL_ALPHA);
                canvas.text(text, origin, style);
            }
            GroundAlert::LowAltitude { meters } => {
                canvas.text(
                    &format!("LOW ALTITUDE: {:.1} m", meters),
                    Point::new(READOUT_INSET, h - READOUT_BOTTOM),
                    TextStyle::new(palette::YELLOW, 0.7, 2),
                );
            }
            GroundAlert::Normal { meters } => {
                canvas.text(
                    &format!("Altitude: {:.1} m", meters),
                    Point::new(READOUT_INSET, h - READOUT_BOTTOM),
                    TextStyle::new(palette::WHITE, 0.7, 1),
                );
            }
        }
    }

    /// Update with the current height and draw the result
    pub fn update_and_draw<C: Canvas + ?Sized>(&mut self, canvas: &mut C, height_dm: u32) -> GroundAlert {
        let alert = self.update(height_dm);
        self.draw(canvas, &alert);
        alert
    }
}
