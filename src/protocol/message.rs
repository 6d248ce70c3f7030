use std::fmt;

use super::rc_code::RcCodeData;
use crate::core::FrameError;

/// One-byte tag at the start of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Device announces it is idle and ready
    Ready = 0x51,
    /// Host asks the device to enter listen mode
    RxRequest = 0x52,
    /// Host asks the device to leave its current mode
    Stop = 0x53,
    /// Host asks the device to transmit a code
    TxRequest = 0x54,
    /// Acknowledgement, carries a [`ReplyKind`]
    Reply = 0x55,
    /// Device reports a received code
    RxReply = 0x56,
}

impl MessageKind {
    /// All message kinds in tag order
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Ready,
        MessageKind::RxRequest,
        MessageKind::Stop,
        MessageKind::TxRequest,
        MessageKind::Reply,
        MessageKind::RxReply,
    ];

    /// Returns the wire tag
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or(FrameError::UnknownKind(tag))
    }
}

/// Status carried by a [`Message::Reply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyKind {
    Ok = 0x00,
    BadCrc = 0x01,
    InvalidSize = 0x02,
    InvalidMessage = 0x03,
}

impl ReplyKind {
    /// Returns the wire tag
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ReplyKind {
    type Error = FrameError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x00 => Ok(ReplyKind::Ok),
            0x01 => Ok(ReplyKind::BadCrc),
            0x02 => Ok(ReplyKind::InvalidSize),
            0x03 => Ok(ReplyKind::InvalidMessage),
            other => Err(FrameError::UnknownReply(other)),
        }
    }
}

impl From<&FrameError> for ReplyKind {
    /// Diagnostic reply sent back for a malformed inbound frame
    fn from(err: &FrameError) -> Self {
        match err {
            FrameError::WrongSize { .. } | FrameError::ShortBuffer { .. } => ReplyKind::InvalidSize,
            FrameError::UnknownKind(_) | FrameError::UnknownReply(_) => ReplyKind::InvalidMessage,
        }
    }
}

/// Protocol messages exchanged with the relay, in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    Ready,
    RxRequest,
    Stop,
    /// Code to transmit
    TxRequest(RcCodeData),
    Reply(ReplyKind),
    /// Code captured by the device
    RxReply(RcCodeData),
}

impl Message {
    /// Returns the kind tag of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ready => MessageKind::Ready,
            Message::RxRequest => MessageKind::RxRequest,
            Message::Stop => MessageKind::Stop,
            Message::TxRequest(_) => MessageKind::TxRequest,
            Message::Reply(_) => MessageKind::Reply,
            Message::RxReply(_) => MessageKind::RxReply,
        }
    }

    /// Returns the RC-code payload, if this message carries one
    pub fn rc_code(&self) -> Option<&RcCodeData> {
        match self {
            Message::TxRequest(data) | Message::RxReply(data) => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::TxRequest(data) | Message::RxReply(data) => {
                write!(f, "{:?}({})", self.kind(), data)
            }
            Message::Reply(reply) => write!(f, "Reply({:?})", reply),
            _ => write!(f, "{:?}", self.kind()),
        }
    }
}
