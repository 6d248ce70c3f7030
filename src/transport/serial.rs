use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use super::{Connector, Transport};
use crate::core::{DeviceConfig, Error, Result, BAUD_RATE, SERIAL_TIMEOUT_MS};

/// Read slice used while blocking without a deadline
const BLOCKING_READ_SLICE: Duration = Duration::from_secs(1);

/// Opens [`SerialTransport`]s on the configured port
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Transport = SerialTransport;

    fn connect(&self, config: &DeviceConfig) -> Result<SerialTransport> {
        SerialTransport::open(&config.port_name, config.inter_byte_timeout)
    }
}

/// Serial link to the relay at 9600 baud, 8-N-1
pub struct SerialTransport {
    /// Open port, `None` once closed
    port: Option<Box<dyn SerialPort>>,
    /// Port name, for logging
    name: String,
    /// Quiet period that ends an inbound burst
    inter_byte_timeout: Duration,
}

impl SerialTransport {
    /// Opens and configures a serial port
    pub fn open(port_name: &str, inter_byte_timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()
            .map_err(|e| open_error(port_name, e))?;

        info!("Opened {} at {} baud", port_name, BAUD_RATE);

        Ok(SerialTransport {
            port: Some(port),
            name: port_name.to_string(),
            inter_byte_timeout,
        })
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

/// Classifies an open failure; a permission denial is recoverable
fn open_error(port_name: &str, err: serialport::Error) -> Error {
    match err.kind() {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            Error::permission_pending(format!("{}: {}", port_name, err))
        }
        _ => Error::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to open {}: {}", port_name, err),
        )),
    }
}

/// Single read bounded by `timeout`; a timeout yields 0 bytes
fn read_some(port: &mut dyn SerialPort, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
    port.set_timeout(timeout)?;
    match port.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
        Err(e) => Err(e),
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let inter_byte_timeout = self.inter_byte_timeout;
        let port = self.port_mut()?;

        let mut received = if timeout.is_zero() {
            loop {
                let n = read_some(&mut **port, buf, BLOCKING_READ_SLICE)?;
                if n > 0 {
                    break n;
                }
            }
        } else {
            read_some(&mut **port, buf, timeout)?
        };

        if received == 0 {
            return Ok(0);
        }

        // Collect the rest of the burst
        while received < buf.len() {
            match read_some(&mut **port, &mut buf[received..], inter_byte_timeout)? {
                0 => break,
                n => received += n,
            }
        }

        Ok(received)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_port_is_io_error() {
        let config = DeviceConfig::for_port("/dev/echowave-does-not-exist");
        match SerialConnector.connect(&config) {
            Err(Error::Io(e)) => assert!(e.to_string().contains("echowave-does-not-exist")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }

    #[test]
    fn test_permission_denied_is_pending() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "Permission denied",
        );
        assert!(open_error("/dev/ttyUSB0", err).is_recoverable());

        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "busy");
        assert!(open_error("/dev/ttyUSB0", err).is_fatal());
    }

    #[test]
    #[ignore] // Requires relay hardware
    fn test_hardware_read_times_out() {
        let mut transport = SerialTransport::open(
            crate::core::DEFAULT_PORT,
            Duration::from_millis(20),
        )
        .unwrap();
        let mut buf = [0u8; 64];
        let _ = transport.read(&mut buf, Duration::from_millis(100)).unwrap();
        transport.close();
        transport.close();
        assert!(!transport.is_open());
    }
}
