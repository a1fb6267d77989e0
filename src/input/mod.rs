//! # Input Module
//!
//! Keyboard input handling.
//!
//! This module handles:
//! - The logical key symbols the control core understands
//! - Press/release events produced by the keyboard source
//! - Reading a Linux keyboard through evdev (see [`keyboard`])

pub mod keyboard;

/// Logical keys recognised by the control core.
///
/// | Key | Function |
/// |-----|----------|
/// | W / S | Forward / back |
/// | A / D | Left / right |
/// | R / F | Up / down |
/// | Q / E | Yaw left / yaw right |
/// | T | Take off (on release) |
/// | L | Land (on release) |
/// | Escape | Exit |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySymbol {
    W,
    S,
    A,
    D,
    R,
    F,
    Q,
    E,
    T,
    L,
    Escape,
}

/// Whether a key went down or came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

/// A single discrete keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeySymbol,
    pub action: KeyAction,
}

impl KeyEvent {
    #[must_use]
    pub fn down(key: KeySymbol) -> Self {
        Self { key, action: KeyAction::Down }
    }

    #[must_use]
    pub fn up(key: KeySymbol) -> Self {
        Self { key, action: KeyAction::Up }
    }
}
