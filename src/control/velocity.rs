//! # Velocity State
//!
//! Keyboard-driven velocity for the four flight axes.
//!
//! ## Key Table
//!
//! | Key | Axis | Sign |
//! |-----|------|------|
//! | W | Forward/back | + |
//! | S | Forward/back | - |
//! | D | Left/right | + |
//! | A | Left/right | - |
//! | R | Up/down | + |
//! | F | Up/down | - |
//! | E | Yaw | + |
//! | Q | Yaw | - |
//!
//! ## Release Semantics
//!
//! Each axis remembers which key currently owns it. Pressing a key takes
//! ownership and sets the axis to that key's signed speed; releasing a key
//! zeroes the axis only if that key is still the owner. Holding W, pressing S
//! and then releasing W therefore keeps streaming "back" instead of stopping,
//! regardless of release order. The axis is never re-derived from other keys
//! still held: releasing the owner always returns the axis to zero.
//!
//! ```
//! use tello_hud::control::velocity::VelocityState;
//! use tello_hud::input::KeySymbol;
//!
//! let mut state = VelocityState::new(60);
//! state.on_key_down(KeySymbol::W);
//! state.on_key_down(KeySymbol::Q);
//! assert_eq!(state.snapshot().forward_back, 60);
//! assert_eq!(state.snapshot().yaw, -60);
//!
//! state.on_key_up(KeySymbol::W);
//! assert_eq!(state.snapshot().forward_back, 0);
//! assert_eq!(state.snapshot().yaw, -60);
//! ```

use crate::input::KeySymbol;

/// Largest magnitude the Tello accepts on any rc axis.
pub const MAX_AXIS_SPEED: i32 = 100;

/// One of the four independently controlled axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    ForwardBack,
    LeftRight,
    UpDown,
    Yaw,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::ForwardBack => 0,
            Axis::LeftRight => 1,
            Axis::UpDown => 2,
            Axis::Yaw => 3,
        }
    }
}

/// Returns the axis a key drives and the sign it applies, or `None` for
/// keys that do not move the vehicle.
#[must_use]
pub fn axis_binding(key: KeySymbol) -> Option<(Axis, i32)> {
    match key {
        KeySymbol::W => Some((Axis::ForwardBack, 1)),
        KeySymbol::S => Some((Axis::ForwardBack, -1)),
        KeySymbol::D => Some((Axis::LeftRight, 1)),
        KeySymbol::A => Some((Axis::LeftRight, -1)),
        KeySymbol::R => Some((Axis::UpDown, 1)),
        KeySymbol::F => Some((Axis::UpDown, -1)),
        KeySymbol::E => Some((Axis::Yaw, 1)),
        KeySymbol::Q => Some((Axis::Yaw, -1)),
        KeySymbol::T | KeySymbol::L | KeySymbol::Escape => None,
    }
}

/// Signed per-axis velocities, ready to stream to the flight link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VelocityVector {
    pub forward_back: i32,
    pub left_right: i32,
    pub up_down: i32,
    pub yaw: i32,
}

impl VelocityVector {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Same vector with any forward component removed
    #[must_use]
    pub fn without_forward(self) -> Self {
        Self {
            forward_back: self.forward_back.min(0),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AxisSlot {
    value: i32,
    owner: Option<KeySymbol>,
}

/// Velocity state mutated by key presses on the control-loop task.
///
/// Not thread-safe; owned exclusively by the control loop.
#[derive(Debug, Clone)]
pub struct VelocityState {
    speed: i32,
    axes: [AxisSlot; 4],
}

impl VelocityState {
    /// Creates a state with every axis at rest.
    ///
    /// `speed` is clamped to `1..=MAX_AXIS_SPEED`.
    #[must_use]
    pub fn new(speed: i32) -> Self {
        Self {
            speed: speed.clamp(1, MAX_AXIS_SPEED),
            axes: [AxisSlot::default(); 4],
        }
    }

    /// Configured magnitude applied while a key is held
    #[must_use]
    pub fn speed(&self) -> i32 {
        self.speed
    }

    /// Sets the key's axis to its signed speed and makes the key its owner.
    ///
    /// Unrecognised keys are ignored; repeated presses are idempotent.
    pub fn on_key_down(&mut self, key: KeySymbol) {
        if let Some((axis, sign)) = axis_binding(key) {
            let slot = &mut self.axes[axis.index()];
            slot.value = sign * self.speed;
            slot.owner = Some(key);
        }
    }

    /// Zeroes the key's axis if the key still owns it.
    pub fn on_key_up(&mut self, key: KeySymbol) {
        if let Some((axis, _)) = axis_binding(key) {
            let slot = &mut self.axes[axis.index()];
            if slot.owner == Some(key) {
                *slot = AxisSlot::default();
            }
        }
    }

    /// Drops every key and stops all axes
    pub fn reset(&mut self) {
        self.axes = [AxisSlot::default(); 4];
    }

    /// Current velocity of one axis
    #[must_use]
    pub fn axis(&self, axis: Axis) -> i32 {
        self.axes[axis.index()].value
    }

    /// Current velocities of all four axes
    #[must_use]
    pub fn snapshot(&self) -> VelocityVector {
        VelocityVector {
            forward_back: self.axis(Axis::ForwardBack),
            left_right: self.axis(Axis::LeftRight),
            up_down: self.axis(Axis::UpDown),
            yaw: self.axis(Axis::Yaw),
        }
    }
}
