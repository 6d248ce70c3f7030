use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Configuration for one device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port name, e.g. `/dev/ttyUSB0` or `COM3`
    pub port_name: String,
    /// Bounded read performed right after opening
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub handshake_timeout: Duration,
    /// Read timeout when awaiting the reply to a request
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub reply_timeout: Duration,
    /// Timeout for every frame write
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub write_timeout: Duration,
    /// Quiet period that ends one inbound burst
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub inter_byte_timeout: Duration,
    /// Listen-mode read timeout. `None` blocks until the device sends something,
    /// which leaves the cancellation latency unbounded.
    #[serde(serialize_with = "super::serde::serialize_opt_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_opt_millis")]
    pub listen_poll_interval: Option<Duration>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            port_name: super::DEFAULT_PORT.to_string(),
            handshake_timeout: Duration::from_millis(super::SERIAL_TIMEOUT_MS),
            reply_timeout: Duration::from_millis(super::SERIAL_TIMEOUT_MS),
            write_timeout: Duration::from_millis(super::SERIAL_TIMEOUT_MS),
            inter_byte_timeout: Duration::from_millis(20),
            listen_poll_interval: None,
        }
    }
}

impl DeviceConfig {
    /// Creates a default configuration for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        DeviceConfig {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Read timeout for listen mode. `Duration::ZERO` means block.
    pub fn listen_timeout(&self) -> Duration {
        self.listen_poll_interval.unwrap_or(Duration::ZERO)
    }

    /// Checks that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(Error::config("Port name is empty"));
        }

        // Zero would mean "block forever" at the transport layer
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("Handshake timeout must be non-zero"));
        }
        if self.reply_timeout.is_zero() {
            return Err(Error::config("Reply timeout must be non-zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::config("Write timeout must be non-zero"));
        }
        if self.inter_byte_timeout.is_zero() {
            return Err(Error::config("Inter-byte timeout must be non-zero"));
        }
        if self.listen_poll_interval == Some(Duration::ZERO) {
            return Err(Error::config("Listen poll interval must be non-zero"));
        }

        Ok(())
    }

    /// Parses a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DeviceConfig = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
