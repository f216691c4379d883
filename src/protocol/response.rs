use bytes::{BufMut, BytesMut};

use crate::protocol::Payload;

/// Single-byte push acknowledgement.
pub const PUSH_OK_BYTE: u8 = 0x00;

/// Single-byte busy-state response sent to rejected connections.
pub const BUSY_BYTE: u8 = 0xFF;

/// Messages sent by the server to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Push accepted (stored or handed off).
    Pushed,
    /// Pop result: header with the payload length, then the payload.
    Popped(Payload),
    /// Connection ceiling reached.
    Busy,
}

impl Response {
    /// Write this message to the buffer.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Response::Pushed => dst.put_u8(PUSH_OK_BYTE),
            Response::Popped(payload) => {
                dst.reserve(1 + payload.len());
                dst.put_u8(payload.len_byte());
                dst.put_slice(payload.as_bytes());
            }
            Response::Busy => dst.put_u8(BUSY_BYTE),
        }
    }
}
