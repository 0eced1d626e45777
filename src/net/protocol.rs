//! Length-prefixed wire protocol for the task server.
//!
//! TCP delivers a byte stream with no message boundaries, so every frame
//! carries a fixed 9-byte header followed by its payload:
//!
//! ```text
//! ┌──────────┬───────────────┬───────────────┬─────────────────────┐
//! │  1 byte  │    4 bytes    │    4 bytes    │  payload_len bytes  │
//! │   type   │ id (BE u32)   │ len (BE u32)  │       payload       │
//! └──────────┴───────────────┴───────────────┴─────────────────────┘
//! ```
//!
//! Integers are big-endian per network convention. The correlation id is
//! echoed in every reply so pipelined responses can be matched to their
//! requests.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Fixed header size: type + id + payload length.
pub const HEADER_LEN: usize = 9;

/// Frames with payloads above this are rejected and the connection closed.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client → server: execute this task.
    Request = 0x01,
    /// Server → client: task result.
    Response = 0x02,
    /// Server → client: task or protocol failure.
    Error = 0x03,
    /// Client → server: liveness check.
    Ping = 0x04,
    /// Server → client: liveness reply.
    Pong = 0x05,
}

impl MessageType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Error),
            0x04 => Some(Self::Ping),
            0x05 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageType,
    /// Correlation id, echoed in replies.
    pub id: u32,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message from any payload-like value.
    pub fn new(kind: MessageType, id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            id,
            payload: payload.into(),
        }
    }

    /// The payload as (lossy) UTF-8, for text protocols and error messages.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Serialize a message into a single buffer ready for the socket.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + msg.payload.len());
    buf.push(msg.kind as u8);
    buf.extend_from_slice(&msg.id.to_be_bytes());
    buf.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&msg.payload);
    buf
}

/// Write a full message to `writer`.
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<()> {
    writer.write_all(&encode(msg))?;
    writer.flush()?;
    Ok(())
}

/// Read one full message from `reader`.
///
/// # Errors
///
/// [`Error::Io`] when the peer closes mid-frame, [`Error::Protocol`] for an
/// unknown type byte or a payload above [`MAX_PAYLOAD`]. Either way the
/// caller should drop the connection, since the stream offset can no longer
/// be trusted.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let kind = MessageType::from_byte(header[0])
        .ok_or_else(|| Error::Protocol(format!("unknown message type 0x{:02x}", header[0])))?;
    let id = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    let payload_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;

    if payload_len > MAX_PAYLOAD {
        return Err(Error::Protocol(format!(
            "payload of {payload_len} bytes exceeds the {MAX_PAYLOAD} byte limit"
        )));
    }

    let mut payload = vec![0_u8; payload_len];
    reader.read_exact(&mut payload)?;

    Ok(Message { kind, id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(msg: &Message) -> Message {
        read_message(&mut Cursor::new(encode(msg))).unwrap()
    }

    #[test]
    fn encode_layout() {
        let msg = Message::new(MessageType::Request, 0x01020304, b"ab".to_vec());
        let bytes = encode(&msg);
        assert_eq!(
            bytes,
            [0x01, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x02, b'a', b'b']
        );
    }

    #[test]
    fn round_trip_all_types() {
        for kind in [
            MessageType::Request,
            MessageType::Response,
            MessageType::Error,
            MessageType::Ping,
            MessageType::Pong,
        ] {
            let msg = Message::new(kind, 7, b"payload".to_vec());
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn round_trip_boundary_payload_sizes() {
        for size in [0_usize, 1, 65_535, 65_536] {
            let msg = Message::new(MessageType::Response, 42, vec![0xAB; size]);
            assert_eq!(round_trip(&msg), msg, "size {size}");
        }
    }

    #[test]
    fn unknown_type_is_a_protocol_error() {
        let mut bytes = encode(&Message::new(MessageType::Ping, 1, Vec::new()));
        bytes[0] = 0x7F;
        let err = read_message(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn oversized_payload_is_rejected_before_reading_it() {
        let mut header = vec![0x01];
        header.extend_from_slice(&1_u32.to_be_bytes());
        header.extend_from_slice(&(MAX_PAYLOAD as u32 + 1).to_be_bytes());
        let err = read_message(&mut Cursor::new(header)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn truncated_stream_is_an_io_error() {
        let bytes = encode(&Message::new(MessageType::Response, 9, vec![1, 2, 3]));
        let err = read_message(&mut Cursor::new(&bytes[..bytes.len() - 1])).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn consecutive_messages_on_one_stream() {
        let a = Message::new(MessageType::Request, 1, b"first".to_vec());
        let b = Message::new(MessageType::Request, 2, b"second".to_vec());
        let mut stream = encode(&a);
        stream.extend_from_slice(&encode(&b));

        let mut cursor = Cursor::new(stream);
        assert_eq!(read_message(&mut cursor).unwrap(), a);
        assert_eq!(read_message(&mut cursor).unwrap(), b);
    }
}
