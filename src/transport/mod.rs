//! Transport layer
//!
//! A transport owns one open half-duplex link to the relay and exposes
//! timeout-bounded write and read primitives. It performs no framing and no
//! retries: every I/O error it reports is treated as fatal by the session.

mod serial;
#[cfg(test)]
pub(crate) mod mock;

pub use self::serial::{SerialConnector, SerialTransport};

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{DeviceConfig, Error, Result};

/// An open link to the device
pub trait Transport: Send {
    /// Writes all of `bytes`, blocking at most `timeout`
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()>;

    /// Reads one inbound burst into `buf`.
    ///
    /// Blocks at most `timeout` for the first byte; `Duration::ZERO` blocks until
    /// data arrives. Returns 0 if nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Releases the link. Safe to call more than once.
    fn close(&mut self);

    /// Returns true until the link has been closed
    fn is_open(&self) -> bool;
}

/// Acquires new transports for a session
pub trait Connector: Send {
    type Transport: Transport;

    /// Opens and configures a new link
    fn connect(&self, config: &DeviceConfig) -> Result<Self::Transport>;
}

/// Gate consulted before a session may open the device
pub trait PortAccess: Send {
    /// Returns `Error::PermissionPending` while access is not yet granted
    fn request(&self, port_name: &str) -> Result<()>;
}

/// Access broker for platforms where the OS open call is the only gate
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedAccess;

impl PortAccess for GrantedAccess {
    fn request(&self, _port_name: &str) -> Result<()> {
        Ok(())
    }
}

/// Access broker that stays pending until an external party grants access
#[derive(Debug, Clone, Default)]
pub struct ManualGrant {
    granted: Arc<AtomicBool>,
}

impl ManualGrant {
    /// Creates a broker with access not yet granted
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants access. Clones of this broker observe the grant.
    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }

    /// Withdraws a previous grant
    pub fn revoke(&self) {
        self.granted.store(false, Ordering::SeqCst);
    }

    /// Returns true if access has been granted
    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

impl PortAccess for ManualGrant {
    fn request(&self, port_name: &str) -> Result<()> {
        if self.is_granted() {
            Ok(())
        } else {
            Err(Error::permission_pending(format!(
                "access to {} has not been granted",
                port_name
            )))
        }
    }
}
