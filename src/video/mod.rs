//! # Video Module
//!
//! Frame sources feeding the HUD compositor.
//!
//! A frame source yields one decoded RGB frame per tick, or `None` when no
//! frame is available (the tick is then skipped).
//!
//! | Source | Selected when |
//! |--------|---------------|
//! | [`StillFrameSource`] | `still_image` is set |
//! | [`tello::TelloVideoSource`] | `stream = true` and built with `tello-video` |
//! | [`BlankFrameSource`] | otherwise |

pub mod tello;

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::VideoConfig;
use crate::error::Result;

/// Source of decoded video frames
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource: Send {
    /// Latest frame, or `None` if none is available this tick
    fn next_frame(&mut self) -> Option<RgbImage>;
}

/// Uniform neutral frame, used when no camera image is configured
#[derive(Debug, Clone)]
pub struct BlankFrameSource {
    frame: RgbImage,
}

impl BlankFrameSource {
    #[must_use]
    pub fn new(width: u32, height: u32, shade: u8) -> Self {
        Self {
            frame: RgbImage::from_pixel(width, height, Rgb([shade, shade, shade])),
        }
    }
}

impl FrameSource for BlankFrameSource {
    fn next_frame(&mut self) -> Option<RgbImage> {
        Some(self.frame.clone())
    }
}

/// Replays a single decoded image file
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    path: PathBuf,
    frame: RgbImage,
}

impl StillFrameSource {
    /// Decode `path` (PNG or JPEG)
    ///
    /// # Errors
    ///
    /// Returns `Image` if the file cannot be read or decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let frame = image::open(&path)?.to_rgb8();
        info!("Loaded still frame {} ({}x{})", path.display(), frame.width(), frame.height());
        Ok(Self { path, frame })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for StillFrameSource {
    fn next_frame(&mut self) -> Option<RgbImage> {
        Some(self.frame.clone())
    }
}

/// Build the frame source described by the video configuration
///
/// # Errors
///
/// Returns `Image` if a configured still image cannot be loaded, or `Io` if
/// the stream port cannot be bound.
pub fn open_source(config: &VideoConfig) -> Result<Box<dyn FrameSource>> {
    if !config.still_image.is_empty() {
        return Ok(Box::new(StillFrameSource::open(&config.still_image)?));
    }

    if config.stream {
        #[cfg(feature = "tello-video")]
        {
            return Ok(Box::new(tello::TelloVideoSource::open(config.stream_port)?));
        }

        #[cfg(not(feature = "tello-video"))]
        warn!("Built without the tello-video feature, the camera stream cannot be decoded");
    }

    warn!(
        "Using blank {}x{} frames (shade {}): obstacle proximity will always read 0%",
        config.width, config.height, config.blank_shade
    );
    Ok(Box::new(BlankFrameSource::new(config.width, config.height, config.blank_shade)))
}
