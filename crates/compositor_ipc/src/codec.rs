//! Framing of the i3-style IPC protocol.
//!
//! Every message on the wire looks like this, with all integers in the host's native byte order
//! (client and compositor always share a machine, which is what i3 and sway assume as well):
//!
//! ```text
//! offset 0:  magic[6]         "i3-ipc"
//! offset 6:  payload_length   u32
//! offset 10: message_type     u32
//! offset 14: payload          payload_length bytes, usually JSON
//! ```

use serde::de::DeserializeOwned;

use crate::error::{ProtocolError, Result};

pub const MAGIC: &[u8; 6] = b"i3-ipc";
pub const HEADER_LEN: usize = MAGIC.len() + 8;

/// Bit that distinguishes pushed events from replies to requests.
pub const EVENT_BIT: u32 = 1 << 31;

/// Raw type tag of a frame. Commands are small integers, events have [`EVENT_BIT`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub u32);

impl MessageType {
    pub const fn event(n: u32) -> Self {
        MessageType(EVENT_BIT | n)
    }

    pub fn is_event(self) -> bool {
        self.0 & EVENT_BIT != 0
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_event() {
            write!(f, "event {}", self.0 & !EVENT_BIT)
        } else {
            write!(f, "command {}", self.0)
        }
    }
}

impl From<u32> for MessageType {
    fn from(n: u32) -> Self {
        MessageType(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub payload_len: u32,
    pub message_type: MessageType,
}

/// One complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(message_type: impl Into<MessageType>, payload: impl Into<Vec<u8>>) -> Self {
        Frame { message_type: message_type.into(), payload: payload.into() }
    }

    pub fn is_event(&self) -> bool {
        self.message_type.is_event()
    }

    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.payload).map_err(ProtocolError::from)?)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(encode(self.message_type, &self.payload)?)
    }

    /// Decode a frame from a buffer that holds at least one complete frame.
    /// Returns the frame and the number of bytes it occupied.
    pub fn decode(buf: &[u8], max_payload_len: usize) -> Result<(Frame, usize)> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated { expected: HEADER_LEN, actual: buf.len() }.into());
        }
        let header = decode_header(&buf[..HEADER_LEN], max_payload_len)?;
        let end = HEADER_LEN + header.payload_len as usize;
        if buf.len() < end {
            return Err(ProtocolError::Truncated { expected: end, actual: buf.len() }.into());
        }
        Ok((Frame { message_type: header.message_type, payload: buf[HEADER_LEN..end].to_vec() }, end))
    }
}

pub fn encode(message_type: MessageType, payload: &[u8]) -> std::result::Result<Vec<u8>, ProtocolError> {
    let payload_len = payload_len(payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&payload_len.to_ne_bytes());
    buf.extend_from_slice(&message_type.0.to_ne_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Length field for a payload of `len` bytes, which has to fit the header's u32.
fn payload_len(len: usize) -> std::result::Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge { len, max: u32::MAX as usize })
}

/// Decode the fixed-size header. `bytes` must be exactly [`HEADER_LEN`] long.
pub fn decode_header(bytes: &[u8], max_payload_len: usize) -> std::result::Result<Header, ProtocolError> {
    if bytes.len() != HEADER_LEN {
        return Err(ProtocolError::Truncated { expected: HEADER_LEN, actual: bytes.len() });
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        let mut got = [0u8; 6];
        got.copy_from_slice(magic);
        return Err(ProtocolError::BadMagic(got));
    }
    let payload_len = u32::from_ne_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let message_type = u32::from_ne_bytes([rest[4], rest[5], rest[6], rest[7]]);
    if payload_len as usize > max_payload_len {
        return Err(ProtocolError::PayloadTooLarge { len: payload_len as usize, max: max_payload_len });
    }
    Ok(Header { payload_len, message_type: MessageType(message_type) })
}
