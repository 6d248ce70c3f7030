//! Protocol implementation module
//!
//! This module defines the relay wire messages, their fixed-size framing and
//! checksum, and the device session state machine built on top of a transport.

pub mod codec;
pub mod message;
pub mod rc_code;
pub mod state;

pub use self::codec::{checksum, decode, encode, Frame, FrameCodec};
pub use self::message::{Message, MessageKind, ReplyKind};
pub use self::rc_code::RcCodeData;
pub use self::state::{Device, Listen, SessionState};

/// Size of every frame on the wire, in both directions
pub const FRAME_SIZE: usize = 18;

/// Payload region between the tag byte and the checksum byte
pub const PAYLOAD_SIZE: usize = 16;
