//! # Control Module
//!
//! Real-time flight control.
//!
//! This module handles:
//! - Keyboard driven velocity state ([`velocity`])
//! - The take-off/landing command queue and its worker ([`dispatcher`])
//! - The per-tick control and HUD loop tying everything together ([`driver`])

pub mod dispatcher;
pub mod driver;
pub mod velocity;
