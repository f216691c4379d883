use bytes::Bytes;

use crate::protocol::ProtocolError;

/// Largest payload a push request can carry (7-bit length field).
pub const MAX_PAYLOAD_LEN: usize = 0x7F;

/// Header bit marking a pop request.
pub(crate) const POP_FLAG: u8 = 0x80;

/// Mask for the payload length bits of a push header.
pub(crate) const LEN_MASK: u8 = 0x7F;

/// Opaque payload of 1..=127 bytes. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    /// Wraps `data`, rejecting empty or oversized payloads.
    pub fn new(data: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let data = data.into();
        if data.is_empty() || data.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadLength(data.len()));
        }
        Ok(Self(data))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length as it appears in the low 7 bits of a header byte.
    pub(crate) fn len_byte(&self) -> u8 {
        self.0.len() as u8 & LEN_MASK
    }

    /// Constructs a payload whose length the caller has already checked.
    pub(crate) fn from_checked(data: Bytes) -> Self {
        debug_assert!(!data.is_empty() && data.len() <= MAX_PAYLOAD_LEN);
        Self(data)
    }
}

/// Decoded first byte of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Pop request; the low 7 bits are ignored.
    Pop,
    /// Push request announcing this many payload bytes.
    Push(usize),
}

impl Header {
    pub fn parse(byte: u8) -> Result<Self, ProtocolError> {
        if byte & POP_FLAG != 0 {
            return Ok(Header::Pop);
        }
        match (byte & LEN_MASK) as usize {
            0 => Err(ProtocolError::EmptyPush),
            len => Ok(Header::Push(len)),
        }
    }
}

/// A fully arrived client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Push(Payload),
    Pop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        assert_eq!(Header::parse(0x80).unwrap(), Header::Pop);
        assert_eq!(Header::parse(0xFF).unwrap(), Header::Pop);
        assert_eq!(Header::parse(0x01).unwrap(), Header::Push(1));
        assert_eq!(Header::parse(0x7F).unwrap(), Header::Push(127));
        assert!(matches!(Header::parse(0x00), Err(ProtocolError::EmptyPush)));
    }

    #[test]
    fn test_payload_bounds() {
        assert!(Payload::new(&b""[..]).is_err());
        assert!(Payload::new(vec![0u8; 128]).is_err());
        let payload = Payload::new(vec![7u8; 127]).unwrap();
        assert_eq!(payload.len(), 127);
        assert_eq!(payload.len_byte(), 127);
    }
}
