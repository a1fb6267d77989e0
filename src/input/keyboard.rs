//! # Keyboard Source
//!
//! Reads key presses from a Linux keyboard using the evdev interface and
//! forwards them to the control loop as [`KeyEvent`]s.
//!
//! ## Device Detection
//!
//! Without an explicit device path, `/dev/input/event*` is scanned in sorted
//! order and the first device that reports both `KEY_W` and `KEY_T` is used.
//!
//! ## Key Values
//!
//! | evdev value | Meaning | Forwarded as |
//! |-------------|---------|--------------|
//! | 0 | Release | `KeyAction::Up` |
//! | 1 | Press | `KeyAction::Down` |
//! | 2 | Auto-repeat | `KeyAction::Down` |

use evdev::{Device, InputEvent, InputEventKind, Key};
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{KeyAction, KeyEvent, KeySymbol};
use crate::error::{HudError, Result};

/// evdev value reported when a key is released
const KEY_RELEASED: i32 = 0;

/// Keyboard handle
///
/// Represents an open evdev keyboard device.
pub struct KeyboardInput {
    device: Device,
    device_path: String,
}

impl std::fmt::Debug for KeyboardInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardInput")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl KeyboardInput {
    /// Open a keyboard device
    ///
    /// # Arguments
    ///
    /// * `device_path` - Explicit `/dev/input/eventX` path, or empty to auto-detect
    ///
    /// # Errors
    ///
    /// - `InputDeviceNotFound`: no keyboard found, or the given path cannot be opened
    pub fn open(device_path: &str) -> Result<Self> {
        if device_path.is_empty() {
            return Self::detect();
        }

        let device = Device::open(device_path).map_err(|e| {
            HudError::InputDeviceNotFound(format!("Failed to open {}: {}", device_path, e))
        })?;
        info!("Using keyboard at: {}", device_path);

        Ok(Self {
            device,
            device_path: device_path.to_string(),
        })
    }

    /// Scan `/dev/input` for the first device that looks like a keyboard
    fn detect() -> Result<Self> {
        let input_dir = Path::new("/dev/input");

        let mut entries: Vec<_> = std::fs::read_dir(input_dir)
            .map_err(|e| HudError::InputDeviceNotFound(format!("Failed to read /dev/input: {}", e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with("event"))
                    .unwrap_or(false)
            })
            .collect();

        // Deterministic choice when several keyboards are attached
        entries.sort();

        for path in entries {
            match Device::open(&path) {
                Ok(device) => {
                    let is_keyboard = device
                        .supported_keys()
                        .map(|keys| keys.contains(Key::KEY_W) && keys.contains(Key::KEY_T))
                        .unwrap_or(false);

                    debug!(
                        "Found input device: {} ({}), keyboard: {}",
                        path.display(),
                        device.name().unwrap_or("unnamed"),
                        is_keyboard
                    );

                    if is_keyboard {
                        let device_path = path.to_string_lossy().to_string();
                        info!("Found keyboard at: {}", device_path);
                        return Ok(Self { device, device_path });
                    }
                }
                Err(e) => {
                    // Permission denied or other errors - skip device
                    debug!("Could not open {}: {}", path.display(), e);
                }
            }
        }

        Err(HudError::InputDeviceNotFound(
            "no device under /dev/input reports KEY_W and KEY_T".to_string(),
        ))
    }

    /// Get the device path of this keyboard
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Start forwarding key events into `tx`
    ///
    /// The task ends when the device disconnects or the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the device cannot be switched to async reading.
    pub fn spawn(self, tx: UnboundedSender<KeyEvent>) -> Result<JoinHandle<()>> {
        let device_path = self.device_path;
        let mut stream = self.device.into_event_stream()?;

        Ok(tokio::spawn(async move {
            loop {
                match stream.next_event().await {
                    Ok(event) => {
                        if let Some(key_event) = map_event(&event) {
                            if tx.send(key_event).is_err() {
                                debug!("Key receiver dropped, stopping keyboard reader");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Keyboard {} stopped delivering events: {}", device_path, e);
                        break;
                    }
                }
            }
        }))
    }
}

/// Map an evdev key code onto the logical keys the control core uses.
#[must_use]
pub fn map_key(key: Key) -> Option<KeySymbol> {
    match key {
        Key::KEY_W => Some(KeySymbol::W),
        Key::KEY_S => Some(KeySymbol::S),
        Key::KEY_A => Some(KeySymbol::A),
        Key::KEY_D => Some(KeySymbol::D),
        Key::KEY_R => Some(KeySymbol::R),
        Key::KEY_F => Some(KeySymbol::F),
        Key::KEY_Q => Some(KeySymbol::Q),
        Key::KEY_E => Some(KeySymbol::E),
        Key::KEY_T => Some(KeySymbol::T),
        Key::KEY_L => Some(KeySymbol::L),
        Key::KEY_ESC => Some(KeySymbol::Escape),
        _ => None,
    }
}

/// Convert a raw evdev event into a [`KeyEvent`], ignoring everything that is
/// not a recognised key.
#[must_use]
pub fn map_event(event: &InputEvent) -> Option<KeyEvent> {
    match event.kind() {
        InputEventKind::Key(key) => {
            let symbol = map_key(key)?;
            let action = if event.value() == KEY_RELEASED {
                KeyAction::Up
            } else {
                KeyAction::Down
            };
            Some(KeyEvent { key: symbol, action })
        }
        _ => None,
    }
}
