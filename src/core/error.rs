use std::io;
use thiserror::Error;

/// Custom error types for the EchoWave driver
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure. Always fatal to the session.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Integrity {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },

    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Device access has not been granted yet. Opening may be retried.
    #[error("Permission pending: {0}")]
    PermissionPending(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Code store error: {0}")]
    Store(String),
}

/// Malformed inbound bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("wrong frame size: expected {expected} bytes, got {actual}")]
    WrongSize {
        /// Required frame size
        expected: usize,
        /// Size actually received
        actual: usize,
    },

    #[error("unknown message kind: 0x{0:02X}")]
    UnknownKind(u8),

    #[error("unknown reply kind: 0x{0:02X}")]
    UnknownReply(u8),

    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    ShortBuffer {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes supplied
        actual: usize,
    },
}

/// Caller misuse of the device session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("device is not initialized")]
    NotInitialized,

    #[error("device is in listening mode")]
    AlreadyListening,

    #[error("device is not listening")]
    NotListening,
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new permission pending error
    pub fn permission_pending(msg: impl Into<String>) -> Self {
        Error::PermissionPending(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new code store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Returns true if the error tore the session down
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Returns true if the caller may simply retry the operation later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::PermissionPending(_))
    }
}
