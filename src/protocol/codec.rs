//! Wire framing for relay messages.
//!
//! Every message in both directions is a fixed 18-byte frame:
//!
//! ```text
//! +-----+----------------------+-----+
//! | tag | payload[0..16]       | crc |
//! +-----+----------------------+-----+
//! ```
//!
//! The CRC-8 covers the tag and payload bytes.

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_8_SMBUS};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, MessageKind, ReplyKind};
use super::rc_code::{RcCodeData, RC_CODE_SIZE};
use super::{FRAME_SIZE, PAYLOAD_SIZE};
use crate::core::{Error, FrameError};

/// Frame checksum: CRC-8, polynomial 0x07, init 0x00
pub const FRAME_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Computes the frame checksum over `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    FRAME_CRC.checksum(bytes)
}

/// Encodes a message into an 18-byte frame
pub fn encode(message: &Message) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    let mut dst = &mut frame[..FRAME_SIZE - 1];

    dst.put_u8(message.kind().tag());
    match message {
        Message::TxRequest(data) | Message::RxReply(data) => data.encode_into(&mut dst),
        Message::Reply(reply) => dst.put_u8(reply.tag()),
        Message::Ready | Message::RxRequest | Message::Stop => {}
    }
    // Remaining payload bytes stay zero

    frame[FRAME_SIZE - 1] = checksum(&frame[..FRAME_SIZE - 1]);
    frame
}

/// Decodes an 18-byte frame.
///
/// A checksum mismatch is not an error here; see [`Frame::verify_checksum`].
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let raw: [u8; FRAME_SIZE] = bytes.try_into().map_err(|_| FrameError::WrongSize {
        expected: FRAME_SIZE,
        actual: bytes.len(),
    })?;

    let payload = &raw[1..1 + PAYLOAD_SIZE];
    let message = match MessageKind::try_from(raw[0])? {
        MessageKind::Ready => Message::Ready,
        MessageKind::RxRequest => Message::RxRequest,
        MessageKind::Stop => Message::Stop,
        MessageKind::Reply => Message::Reply(ReplyKind::try_from(payload[0])?),
        MessageKind::TxRequest => Message::TxRequest(RcCodeData::decode(payload)?),
        MessageKind::RxReply => Message::RxReply(RcCodeData::decode(payload)?),
    };

    Ok(Frame {
        message,
        checksum: raw[FRAME_SIZE - 1],
        raw,
    })
}

/// A message decoded from the wire together with its received checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded message
    pub message: Message,
    /// Checksum byte as received
    pub checksum: u8,
    /// Raw frame bytes as received
    raw: [u8; FRAME_SIZE],
}

impl Frame {
    /// Builds the frame that [`encode`] would put on the wire
    pub fn new(message: Message) -> Self {
        let raw = encode(&message);
        Frame {
            message,
            checksum: raw[FRAME_SIZE - 1],
            raw,
        }
    }

    /// Checksum computed over the received tag and payload bytes
    pub fn computed_checksum(&self) -> u8 {
        checksum(&self.raw[..FRAME_SIZE - 1])
    }

    /// Returns true if the received checksum matches the frame contents
    pub fn verify_checksum(&self) -> bool {
        self.computed_checksum() == self.checksum
    }

    /// Like [`Frame::verify_checksum`], reporting the mismatch as an error
    pub fn check_integrity(&self) -> Result<(), Error> {
        let expected = self.computed_checksum();
        if expected == self.checksum {
            Ok(())
        } else {
            Err(Error::Integrity {
                expected,
                actual: self.checksum,
            })
        }
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.raw
    }
}

/// Codec splitting a byte stream into fixed-size relay frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_SIZE {
            // Need more data
            src.reserve(FRAME_SIZE - src.len());
            return Ok(None);
        }

        let bytes = src.split_to(FRAME_SIZE);
        Ok(Some(decode(&bytes)?))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(FRAME_SIZE);
        dst.extend_from_slice(&encode(&item));
        Ok(())
    }
}

// Every RC-code payload fills the payload region exactly
const _: () = assert!(RC_CODE_SIZE == PAYLOAD_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_code(rng: &mut StdRng) -> RcCodeData {
        RcCodeData {
            code: rng.gen(),
            length: rng.gen(),
            repeat: rng.gen(),
            pulse_length: rng.gen(),
            sync_factor: rng.gen(),
            one: rng.gen(),
            zero: rng.gen(),
            inverted: rng.gen(),
        }
    }

    fn all_messages(rng: &mut StdRng) -> Vec<Message> {
        vec![
            Message::Ready,
            Message::RxRequest,
            Message::Stop,
            Message::TxRequest(random_code(rng)),
            Message::RxReply(random_code(rng)),
            Message::Reply(ReplyKind::Ok),
            Message::Reply(ReplyKind::BadCrc),
            Message::Reply(ReplyKind::InvalidSize),
            Message::Reply(ReplyKind::InvalidMessage),
        ]
    }

    #[test]
    fn test_crc8_check_value() {
        // Standard CRC-8/SMBUS check input
        assert_eq!(checksum(b"123456789"), 0xF4);
        assert_eq!(checksum(&[]), 0x00);
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode(&Message::Reply(ReplyKind::InvalidSize));
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(frame[0], 0x55);
        assert_eq!(frame[1], 0x02);
        assert!(frame[2..17].iter().all(|&b| b == 0));
        assert_eq!(frame[17], checksum(&frame[..17]));

        let frame = encode(&Message::Stop);
        assert_eq!(frame[0], 0x53);
        assert!(frame[1..17].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rc_payload_position() {
        let data = RcCodeData {
            code: 0x01A2_B3C4,
            length: 24,
            repeat: 3,
            pulse_length: 350,
            sync_factor: 31,
            one: 1,
            zero: 0,
            inverted: false,
        };
        let frame = encode(&Message::RxReply(data));
        assert_eq!(frame[0], 0x56);
        assert_eq!(&frame[1..17], &data.encode());
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            for message in all_messages(&mut rng) {
                let frame = decode(&encode(&message)).unwrap();
                assert_eq!(frame.message, message);
                assert!(frame.verify_checksum());
                assert!(frame.check_integrity().is_ok());
                assert_eq!(frame, Frame::new(message));
            }
        }
    }

    #[test]
    fn test_wrong_size() {
        let frame = encode(&Message::Ready);
        for len in [0, 1, 17, 19, 64] {
            let mut bytes = frame.to_vec();
            bytes.resize(len, 0);
            assert_eq!(
                decode(&bytes),
                Err(FrameError::WrongSize {
                    expected: FRAME_SIZE,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn test_unknown_kind_and_reply() {
        let mut bytes = encode(&Message::Ready);
        bytes[0] = 0x42;
        assert_eq!(decode(&bytes), Err(FrameError::UnknownKind(0x42)));

        let mut bytes = encode(&Message::Reply(ReplyKind::Ok));
        bytes[1] = 0x09;
        assert_eq!(decode(&bytes), Err(FrameError::UnknownReply(0x09)));
    }

    #[test]
    fn test_bad_checksum_still_decodes() {
        let mut bytes = encode(&Message::Stop);
        bytes[17] ^= 0xFF;
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.message, Message::Stop);
        assert!(!frame.verify_checksum());
        assert!(matches!(frame.check_integrity(), Err(Error::Integrity { .. })));
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let mut rng = StdRng::seed_from_u64(0x433);
        for message in all_messages(&mut rng) {
            let original = encode(&message);
            for byte in 0..FRAME_SIZE - 1 {
                for bit in 0..8 {
                    let mut corrupted = original;
                    corrupted[byte] ^= 1 << bit;
                    // A flip may also turn the frame into an unknown kind
                    if let Ok(frame) = decode(&corrupted) {
                        assert!(
                            !frame.verify_checksum(),
                            "flip at byte {} bit {} of {} went unnoticed",
                            byte,
                            bit,
                            message
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_codec_stream() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();

        codec.encode(Message::RxRequest, &mut bytes).unwrap();
        codec.encode(Message::Reply(ReplyKind::Ok), &mut bytes).unwrap();
        assert_eq!(bytes.len(), 2 * FRAME_SIZE);

        // Partial frame
        let mut partial = bytes.split_to(10);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(bytes);

        let first = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(first.message, Message::RxRequest);
        let second = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(second.message, Message::Reply(ReplyKind::Ok));
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_codec_rejects_unknown_kind() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::from(&[0u8; FRAME_SIZE][..]);
        let err = codec.decode(&mut bytes).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::UnknownKind(0))));
        assert!(bytes.is_empty());
    }
}
