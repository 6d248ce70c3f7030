//! RC-code payload layout.
//!
//! ```text
//! +------+--------+--------+-------+-------+--------+--------+-----+
//! | 0..4 | 4..6   | 6      | 7..9  | 9..11 | 11..13 | 13..15 | 15  |
//! | code | length | repeat | pulse | sync  | one    | zero   | inv |
//! +------+--------+--------+-------+-------+--------+--------+-----+
//! ```
//!
//! All multi-byte fields are little-endian.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::core::FrameError;

/// Size of an encoded [`RcCodeData`]
pub const RC_CODE_SIZE: usize = 16;

/// Timing profile of one captured 433 MHz remote-control code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RcCodeData {
    /// Received code value
    pub code: u32,
    /// Code length in bits
    pub length: u16,
    /// Number of times the code is repeated on transmit
    pub repeat: u8,
    /// Base pulse length in microseconds
    pub pulse_length: u16,
    /// Sync pulse length, in pulses
    pub sync_factor: u16,
    /// Pulse count of a "one" bit
    pub one: u16,
    /// Pulse count of a "zero" bit
    pub zero: u16,
    /// Whether the signal levels are inverted
    pub inverted: bool,
}

impl RcCodeData {
    /// Encodes the payload into its 16-byte wire layout
    pub fn encode(&self) -> [u8; RC_CODE_SIZE] {
        let mut out = [0u8; RC_CODE_SIZE];
        let mut dst = &mut out[..];
        self.encode_into(&mut dst);
        out
    }

    /// Appends the 16-byte wire layout to `dst`
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.code);
        dst.put_u16_le(self.length);
        dst.put_u8(self.repeat);
        dst.put_u16_le(self.pulse_length);
        dst.put_u16_le(self.sync_factor);
        dst.put_u16_le(self.one);
        dst.put_u16_le(self.zero);
        dst.put_u8(self.inverted as u8);
    }

    /// Decodes a payload from the first 16 bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < RC_CODE_SIZE {
            return Err(FrameError::ShortBuffer {
                expected: RC_CODE_SIZE,
                actual: bytes.len(),
            });
        }

        let mut src = &bytes[..RC_CODE_SIZE];
        Ok(RcCodeData {
            code: src.get_u32_le(),
            length: src.get_u16_le(),
            repeat: src.get_u8(),
            pulse_length: src.get_u16_le(),
            sync_factor: src.get_u16_le(),
            one: src.get_u16_le(),
            zero: src.get_u16_le(),
            inverted: src.get_u8() != 0,
        })
    }
}

impl fmt::Display for RcCodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code={} ({} bits) repeat={} pulse={}us sync={} one={} zero={}{}",
            self.code,
            self.length,
            self.repeat,
            self.pulse_length,
            self.sync_factor,
            self.one,
            self.zero,
            if self.inverted { " inverted" } else { "" },
        )
    }
}
