//! # Telemetry Module
//!
//! Latest-value attitude and altitude samples from the drone.
//!
//! The link publishes each decoded state datagram into a `tokio::sync::watch`
//! channel; the control loop polls the most recent value once per tick through
//! [`TelemetrySampler`]. No history is kept.

use tokio::sync::watch;

/// One attitude/altitude sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    /// Roll in degrees, positive = right wing down
    pub roll: f32,
    /// Pitch in degrees, positive = nose up
    pub pitch: f32,
    /// Height above ground in decimeters
    pub height_dm: u32,
}

impl TelemetrySnapshot {
    /// Height above ground in meters
    #[must_use]
    pub fn height_m(&self) -> f32 {
        self.height_dm as f32 / 10.0
    }

    /// Whether the attitude values can be used for rendering
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite()
    }
}

/// Polls the newest telemetry sample published by the flight link.
#[derive(Debug, Clone)]
pub struct TelemetrySampler {
    feed: watch::Receiver<Option<TelemetrySnapshot>>,
}

impl TelemetrySampler {
    #[must_use]
    pub fn new(feed: watch::Receiver<Option<TelemetrySnapshot>>) -> Self {
        Self { feed }
    }

    /// Returns the most recent valid sample, or `None` if nothing usable has
    /// arrived yet.
    #[must_use]
    pub fn sample(&self) -> Option<TelemetrySnapshot> {
        let latest = *self.feed.borrow();
        latest.filter(TelemetrySnapshot::is_valid)
    }
}
