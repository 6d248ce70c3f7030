//! Core types for the EchoWave driver
//!
//! This module contains the error taxonomy and session configuration shared by the
//! protocol, transport and handle layers.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, FrameError, Result, StateError};
pub use self::types::DeviceConfig;

/// Serial line speed. The relay firmware only speaks 9600 8-N-1.
pub const BAUD_RATE: u32 = 9600;

/// Default request/reply timeout in milliseconds
pub const SERIAL_TIMEOUT_MS: u64 = 500;

/// Default serial port name
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM3";
/// Default serial port name
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
