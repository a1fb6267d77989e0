//! # Tello HUD
//!
//! Fly a Tello quadcopter from the keyboard with a live attitude and
//! proximity HUD.
//!
//! ## Controls
//!
//! | Key | Action |
//! |-----|--------|
//! | W / S | Forward / back |
//! | A / D | Left / right |
//! | R / F | Up / down |
//! | Q / E | Yaw left / right |
//! | T | Take off (on release) |
//! | L | Land (on release) |
//! | Esc | Land if airborne and exit |

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tello_hud::config::{Config, LoggingConfig};
use tello_hud::control::driver::ControlLoop;
use tello_hud::input::keyboard::KeyboardInput;
use tello_hud::link::tello::TelloLink;
use tello_hud::link::{self, FlightLink};
use tello_hud::video;

/// Config file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Bound on stopping the stream when startup fails after connecting
const STARTUP_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Main entry point for Tello HUD
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (defaults if the file does not exist)
///    - Set up logging
///    - Open the keyboard and the frame source
///    - Connect to the drone and start its video stream
///
/// 2. **Main Loop**
///    - Keyboard events update velocity or queue take-off/landing
///    - Every tick: stream velocity while armed and composite the HUD
///
/// 3. **Graceful Shutdown**
///    - Land if airborne, bounded by the configured grace period
///    - Stop the video stream and close the link
///
/// # Errors
///
/// Returns error if:
/// - The configuration file is invalid
/// - The drone cannot be reached (fatal)
/// - No keyboard can be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        Config::load(&config_path).with_context(|| format!("Invalid config {}", config_path))?
    } else {
        Config::default()
    };

    let _log_guard = init_logging(&config.logging)?;

    info!("Tello HUD v{} starting...", env!("CARGO_PKG_VERSION"));
    if config_found {
        info!("Loaded configuration from {}", config_path);
    } else {
        warn!("{} not found, using default configuration", config_path);
    }

    // Local resources first so a failure here never leaves the drone streaming
    let keyboard = KeyboardInput::open(&config.input.device_path)?;
    let frames = video::open_source(&config.video)?;

    let link = Arc::new(TelloLink::bind(&config.link).await?);
    link.connect().await.context("Could not connect to the drone")?;
    match link.battery().await {
        Ok(percent) => info!("Battery: {}%", percent),
        Err(e) => warn!("Battery query failed: {}", e),
    }
    if let Err(e) = link.stream_on().await {
        link::close(link.as_ref(), STARTUP_CLOSE_TIMEOUT).await;
        return Err(e.into());
    }
    info!("Video stream enabled");

    let (key_tx, key_rx) = mpsc::unbounded_channel();
    let started = ControlLoop::new(&config, link.clone(), frames)
        .and_then(|control| Ok((control, keyboard.spawn(key_tx)?)));
    let (mut control, keyboard_task) = match started {
        Ok(started) => started,
        Err(e) => {
            link::close(link.as_ref(), STARTUP_CLOSE_TIMEOUT).await;
            return Err(e.into());
        }
    };
    info!("Ready. T to take off, L to land, Esc to exit");

    let outcome = control.run(key_rx).await;

    // Land and close the link even if the loop failed
    let report = control.shutdown().await;
    keyboard_task.abort();

    if report.timed_out {
        warn!("Landing did not complete within the grace period");
    }

    outcome?;
    Ok(())
}

/// Install the global subscriber.
///
/// Console output always; a non-blocking file writer as well when a log file is
/// configured. The returned guard must be held until exit so buffered lines are
/// flushed.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(logging.level.parse()?);

    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let (dir, file_name) = log_file_parts(&logging.file)?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(Some(guard))
}

/// Split a log file path into its directory (current directory if none) and file name
fn log_file_parts(file: &str) -> Result<(PathBuf, PathBuf)> {
    let path = Path::new(file);
    let file_name = path
        .file_name()
        .map(PathBuf::from)
        .with_context(|| format!("Log file path has no file name: {}", file))?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    Ok((dir, file_name))
}
