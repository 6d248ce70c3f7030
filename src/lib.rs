//! EchoWave: host-side driver for the EchoWave 433 MHz RC relay
//!
//! The relay speaks a half-duplex protocol of fixed 18-byte frames over a serial
//! line. This library implements the frame codec, the device session state machine,
//! an async worker handle around it, and a small store for captured codes.
pub mod core;
pub mod handle;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-export commonly used items
pub use crate::core::{DeviceConfig, Error, Result};
pub use crate::handle::{DeviceEvent, DeviceEvents, DeviceHandle};
pub use crate::protocol::{Device, RcCodeData};
pub use crate::store::{CodeStore, RcCode};
pub use crate::transport::SerialConnector;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
