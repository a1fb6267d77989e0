//! # Error Types
//!
//! Custom error types for Tello HUD using `thiserror`.

use std::time::Duration;

use thiserror::Error;

use crate::control::dispatcher::FlightCommand;

/// Main error type for Tello HUD
#[derive(Debug, Error)]
pub enum HudError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding/encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The initial connection to the drone could not be established (fatal)
    #[error("Link connection failed: {0}")]
    LinkConnection(String),

    /// A link request failed, timed out or was rejected by the drone
    #[error("Link error: {0}")]
    Link(String),

    /// A take-off or landing did not complete
    #[error("{command} failed: {reason}")]
    CommandExecution {
        command: FlightCommand,
        reason: String,
    },

    /// A frame or telemetry sample was missing or invalid for this tick
    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// The graceful landing wait ran out during teardown
    #[error("Teardown timed out after {0:?}")]
    TeardownTimeout(Duration),

    /// No usable keyboard device was found
    #[error("Input device not found: {0}")]
    InputDeviceNotFound(String),

    /// The video stream could not be received or decoded
    #[error("Video error: {0}")]
    Video(String),

    /// HUD surface allocation or drawing failure
    #[error("Render error: {0}")]
    Render(String),

    /// The command worker is gone and can no longer accept commands
    #[error("Command dispatcher is closed")]
    DispatcherClosed,
}

/// Result type alias for Tello HUD
pub type Result<T> = std::result::Result<T, HudError>;
