//! # Tello HUD Library
//!
//! Fly a Tello quadcopter from the keyboard with a live video HUD.
//!
//! This library provides the real-time control core: a velocity-streaming loop
//! that is never blocked by multi-second take-off/landing calls, plus the
//! telemetry-driven HUD alerts (ground proximity, obstacle proximity and an
//! artificial horizon) composited onto each frame.

pub mod config;
pub mod control;
pub mod error;
pub mod hud;
pub mod input;
pub mod link;
pub mod telemetry;
pub mod video;
