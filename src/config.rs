//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{HudError, Result};

/// Largest accepted horizon displacement per degree of pitch, in pixels
pub const MAX_PITCH_SCALE: f32 = 20.0;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub hud: HudConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Drone link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_drone_addr")]
    pub drone_addr: String,

    #[serde(default = "default_local_addr")]
    pub local_addr: String,

    #[serde(default = "default_state_addr")]
    pub state_addr: String,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

/// Control loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Magnitude streamed on an axis while its key is held (Tello rc units)
    #[serde(default = "default_speed")]
    pub speed: i32,

    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub veto_forward_on_obstacle: bool,
}

/// Keyboard configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputConfig {
    /// Empty means auto-detect
    #[serde(default)]
    pub device_path: String,
}

/// Video frame configuration
#[derive(Debug, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_frame_width")]
    pub width: u32,

    #[serde(default = "default_frame_height")]
    pub height: u32,

    #[serde(default)]
    pub still_image: String,

    #[serde(default = "default_blank_shade")]
    pub blank_shade: u8,

    /// Decode the drone's H.264 stream when no still image is configured
    #[serde(default = "default_stream")]
    pub stream: bool,

    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
}

/// HUD alert and instrument configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HudConfig {
    #[serde(default = "default_critical_height_dm")]
    pub critical_height_dm: u32,

    #[serde(default = "default_warning_height_dm")]
    pub warning_height_dm: u32,

    #[serde(default = "default_blink_period_ticks")]
    pub blink_period_ticks: u64,

    #[serde(default = "default_danger_threshold")]
    pub danger_threshold: f32,

    #[serde(default = "default_horizon_size")]
    pub horizon_size: u32,

    #[serde(default = "default_horizon_margin")]
    pub horizon_margin: u32,

    #[serde(default = "default_pitch_scale")]
    pub pitch_scale: f32,

    #[serde(default = "default_boot_banner_frames")]
    pub boot_banner_frames: u32,

    #[serde(default)]
    pub snapshot_dir: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file: String,
}

// Default value functions
fn default_drone_addr() -> String { "192.168.10.1:8889".to_string() }
fn default_local_addr() -> String { "0.0.0.0:8889".to_string() }
fn default_state_addr() -> String { "0.0.0.0:8890".to_string() }
fn default_response_timeout_ms() -> u64 { 20000 }
fn default_connect_retries() -> u32 { 3 }

fn default_speed() -> i32 { 60 }
fn default_tick_rate_hz() -> u32 { 30 }
fn default_shutdown_grace_ms() -> u64 { 4000 }

fn default_frame_width() -> u32 { 960 }
fn default_frame_height() -> u32 { 720 }
fn default_blank_shade() -> u8 { 128 }
fn default_stream() -> bool { true }
fn default_stream_port() -> u16 { 11111 }

fn default_critical_height_dm() -> u32 { 3 }
fn default_warning_height_dm() -> u32 { 6 }
fn default_blink_period_ticks() -> u64 { 20 }
fn default_danger_threshold() -> f32 { 0.30 }
fn default_horizon_size() -> u32 { 300 }
fn default_horizon_margin() -> u32 { 20 }
fn default_pitch_scale() -> f32 { 3.0 }
fn default_boot_banner_frames() -> u32 { 120 }

fn default_log_level() -> String { "info".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            drone_addr: default_drone_addr(),
            local_addr: default_local_addr(),
            state_addr: default_state_addr(),
            response_timeout_ms: default_response_timeout_ms(),
            connect_retries: default_connect_retries(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            tick_rate_hz: default_tick_rate_hz(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            veto_forward_on_obstacle: false,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: default_frame_width(),
            height: default_frame_height(),
            still_image: String::new(),
            blank_shade: default_blank_shade(),
            stream: default_stream(),
            stream_port: default_stream_port(),
        }
    }
}

impl Default for HudConfig {
    fn default() -> Self {
        Self {
            critical_height_dm: default_critical_height_dm(),
            warning_height_dm: default_warning_height_dm(),
            blink_period_ticks: default_blink_period_ticks(),
            danger_threshold: default_danger_threshold(),
            horizon_size: default_horizon_size(),
            horizon_margin: default_horizon_margin(),
            pitch_scale: default_pitch_scale(),
            boot_banner_frames: default_boot_banner_frames(),
            snapshot_dir: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl ControlConfig {
    /// Period between two control ticks
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }

    /// Bounded wait for the landing command during teardown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl LinkConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn invalid(message: impl std::fmt::Display) -> HudError {
    HudError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tello_hud::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Link
        for (name, value) in [
            ("drone_addr", &self.link.drone_addr),
            ("local_addr", &self.link.local_addr),
            ("state_addr", &self.link.state_addr),
        ] {
            if value.parse::<std::net::SocketAddr>().is_err() {
                return Err(invalid(format!("{} must be an ip:port address, got '{}'", name, value)));
            }
        }

        if self.link.response_timeout_ms == 0 || self.link.response_timeout_ms > 60000 {
            return Err(invalid("response_timeout_ms must be between 1 and 60000"));
        }

        if self.link.connect_retries == 0 || self.link.connect_retries > 10 {
            return Err(invalid("connect_retries must be between 1 and 10"));
        }

        // Control
        if self.control.speed < 1 || self.control.speed > 100 {
            return Err(invalid("speed must be between 1 and 100"));
        }

        if self.control.tick_rate_hz == 0 || self.control.tick_rate_hz > 120 {
            return Err(invalid("tick_rate_hz must be between 1 and 120"));
        }

        if self.control.shutdown_grace_ms == 0 || self.control.shutdown_grace_ms > 60000 {
            return Err(invalid("shutdown_grace_ms must be between 1 and 60000"));
        }

        // Video
        for (name, value) in [("width", self.video.width), ("height", self.video.height)] {
            if !(64..=4096).contains(&value) {
                return Err(invalid(format!("video {} must be between 64 and 4096", name)));
            }
        }

        // HUD
        if self.hud.critical_height_dm >= self.hud.warning_height_dm {
            return Err(invalid("critical_height_dm must be less than warning_height_dm"));
        }

        if self.hud.blink_period_ticks < 2 || self.hud.blink_period_ticks % 2 != 0 {
            return Err(invalid("blink_period_ticks must be an even number of at least 2"));
        }

        if !(self.hud.danger_threshold > 0.0 && self.hud.danger_threshold <= 1.0) {
            return Err(invalid("danger_threshold must be in (0.0, 1.0]"));
        }

        if !(self.hud.pitch_scale > 0.0 && self.hud.pitch_scale <= MAX_PITCH_SCALE) {
            return Err(invalid(format!("pitch_scale must be in (0.0, {}]", MAX_PITCH_SCALE)));
        }

        if self.hud.horizon_size < 50 {
            return Err(invalid("horizon_size must be at least 50"));
        }

        let footprint = self.hud.horizon_size.saturating_add(self.hud.horizon_margin);
        if footprint > self.video.width || footprint > self.video.height {
            return Err(invalid("horizon_size plus horizon_margin must fit inside the video frame"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}
