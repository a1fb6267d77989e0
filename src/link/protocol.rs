//! # Tello SDK Protocol
//!
//! Text commands and state datagram decoding for the Tello SDK.
//!
//! ## Commands (UDP, drone port 8889)
//!
//! | Command | Reply | Notes |
//! |---------|-------|-------|
//! | `command` | `ok` | Enter SDK mode |
//! | `takeoff` | `ok` | Returns once hovering (several seconds) |
//! | `land` | `ok` | Returns once landed |
//! | `streamon` / `streamoff` | `ok` | Video stream on port 11111 |
//! | `battery?` | `0`-`100` | Battery percent |
//! | `rc a b c d` | none | Left/right, forward/back, up/down, yaw (-100..100) |
//!
//! ## State (UDP, local port 8890)
//!
//! `pitch:%d;roll:%d;yaw:%d;vgx:%d;vgy:%d;vgz:%d;templ:%d;temph:%d;tof:%d;h:%d;bat:%d;baro:%.2f;time:%d;agx:%.2f;agy:%.2f;agz:%.2f;\r\n`
//!
//! `h` is the height above the take-off point in centimeters.

use crate::control::velocity::{VelocityVector, MAX_AXIS_SPEED};
use crate::error::{HudError, Result};
use crate::telemetry::TelemetrySnapshot;

/// Enter SDK mode
pub const CMD_SDK_MODE: &str = "command";
/// Take off
pub const CMD_TAKEOFF: &str = "takeoff";
/// Land
pub const CMD_LAND: &str = "land";
/// Start video
pub const CMD_STREAM_ON: &str = "streamon";
/// Stop video
pub const CMD_STREAM_OFF: &str = "streamoff";
/// Query battery percentage
pub const CMD_BATTERY: &str = "battery?";

/// Positive acknowledgement
pub const REPLY_OK: &str = "ok";

/// Largest datagram the drone sends
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Encode an `rc` velocity command.
///
/// Values are clamped to the SDK range.
///
/// ```
/// use tello_hud::control::velocity::VelocityVector;
/// use tello_hud::link::protocol::encode_rc;
///
/// let v = VelocityVector { forward_back: 60, left_right: -20, up_down: 0, yaw: 150 };
/// assert_eq!(encode_rc(v), "rc -20 60 0 100");
/// ```
#[must_use]
pub fn encode_rc(velocity: VelocityVector) -> String {
    let clamp = |v: i32| v.clamp(-MAX_AXIS_SPEED, MAX_AXIS_SPEED);
    format!(
        "rc {} {} {} {}",
        clamp(velocity.left_right),
        clamp(velocity.forward_back),
        clamp(velocity.up_down),
        clamp(velocity.yaw)
    )
}

/// Check a command reply
///
/// # Errors
///
/// Returns `Link` if the drone answered anything other than `ok`.
pub fn check_ok(command: &str, reply: &str) -> Result<()> {
    if reply.trim().eq_ignore_ascii_case(REPLY_OK) {
        Ok(())
    } else {
        Err(HudError::Link(format!("'{}' rejected: {}", command, reply.trim())))
    }
}

/// Parse a `battery?` reply
///
/// # Errors
///
/// Returns `Link` if the reply is not a percentage.
pub fn parse_battery(reply: &str) -> Result<u8> {
    reply
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|percent| *percent <= 100)
        .ok_or_else(|| HudError::Link(format!("Invalid battery reply: {}", reply.trim())))
}

/// Look up one `key:value` field of a state datagram.
fn field<'a>(state: &'a str, key: &str) -> Option<&'a str> {
    state
        .split(';')
        .filter_map(|pair| pair.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}

fn numeric_field(state: &str, key: &str) -> Result<f32> {
    let raw = field(state, key)
        .ok_or_else(|| HudError::TelemetryUnavailable(format!("State is missing '{}'", key)))?;
    raw.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| HudError::TelemetryUnavailable(format!("Invalid '{}' value: {}", key, raw)))
}

/// Decode a state datagram into a telemetry snapshot
///
/// # Errors
///
/// Returns `TelemetryUnavailable` if `roll`, `pitch` or `h` is missing or not a number.
///
/// ```
/// use tello_hud::link::protocol::parse_state;
///
/// let state = parse_state("pitch:-4;roll:12;yaw:0;tof:40;h:85;bat:77;\r\n")?;
/// assert_eq!(state.roll, 12.0);
/// assert_eq!(state.pitch, -4.0);
/// assert_eq!(state.height_dm, 8);
/// # Ok::<(), tello_hud::error::HudError>(())
/// ```
pub fn parse_state(datagram: &str) -> Result<TelemetrySnapshot> {
    let roll = numeric_field(datagram, "roll")?;
    let pitch = numeric_field(datagram, "pitch")?;
    let height_cm = numeric_field(datagram, "h")?;

    Ok(TelemetrySnapshot {
        roll,
        pitch,
        height_dm: (height_cm.max(0.0) / 10.0) as u32,
    })
}
