//! Hello handshake wire format.
//!
//! One frame per connection, all integers in network byte order:
//!
//! ```text
//! 0        4      6            10
//! +--------+------+------------+
//! | type   | len  | version    |
//! | u32    | u16  | u32        |
//! +--------+------+------------+
//! ```
//!
//! `type` 0 is Hello, `len` is the payload length (always 4 for Hello).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the frame header (type + len).
pub const HEADER_LEN: usize = 6;

/// Size of the Hello payload.
pub const HELLO_PAYLOAD_LEN: usize = 4;

/// Total size of a Hello frame.
pub const HELLO_FRAME_LEN: usize = HEADER_LEN + HELLO_PAYLOAD_LEN;

/// Message type tag for Hello.
pub const MSG_HELLO: u32 = 0;

/// The only protocol version the server accepts.
pub const PROTOCOL_VERSION: u32 = 1;

/// A decoded protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Hello { version: u32 },
}

/// Frame-level decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header carried a type tag we don't know.
    UnknownType(u32),
    /// Length field disagrees with the payload size for the message type.
    BadLength { expected: usize, actual: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownType(tag) => write!(f, "unknown message type {tag}"),
            ProtocolError::BadLength { expected, actual } => {
                write!(f, "bad payload length {actual}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Decode result.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete message and the number of bytes it occupied.
    Complete(Message, usize),
    /// Not enough bytes for a full frame.
    Incomplete,
    /// Malformed frame.
    Error(ProtocolError),
}

/// Encode a message into a freshly allocated frame.
pub fn encode(message: &Message) -> Bytes {
    match message {
        Message::Hello { version } => {
            let mut buf = BytesMut::with_capacity(HELLO_FRAME_LEN);
            buf.put_u32(MSG_HELLO);
            buf.put_u16(HELLO_PAYLOAD_LEN as u16);
            buf.put_u32(*version);
            buf.freeze()
        }
    }
}

/// Decode one frame from the start of `input`.
///
/// Trailing bytes past the frame are ignored; the caller sees how many
/// were consumed.
pub fn decode(input: &[u8]) -> DecodeResult {
    if input.len() < HEADER_LEN {
        return DecodeResult::Incomplete;
    }

    let mut cursor = input;
    let tag = cursor.get_u32();
    let len = cursor.get_u16() as usize;

    if tag != MSG_HELLO {
        return DecodeResult::Error(ProtocolError::UnknownType(tag));
    }
    if len != HELLO_PAYLOAD_LEN {
        return DecodeResult::Error(ProtocolError::BadLength {
            expected: HELLO_PAYLOAD_LEN,
            actual: len,
        });
    }
    if cursor.remaining() < len {
        return DecodeResult::Incomplete;
    }

    let version = cursor.get_u32();
    DecodeResult::Complete(Message::Hello { version }, HEADER_LEN + len)
}
