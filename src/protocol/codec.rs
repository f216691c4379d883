use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{Header, Payload, ProtocolError, Request, Response};

/// Where the decoder is within the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    AwaitingHeader,
    /// Header consumed; waiting for this many payload bytes.
    AwaitingPayload(usize),
}

/// Codec for the stack protocol.
/// Decodes `Request` from clients and encodes `Response` back to them.
///
/// The decoder is resumable: bytes may arrive in arbitrary chunks and the
/// header is consumed as soon as it is seen. A request is yielded exactly
/// when its last byte arrives.
#[derive(Debug, Default)]
pub struct StackCodec {
    state: DecodeState,
}

impl StackCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if part of a request has been consumed but not yet yielded.
    pub fn is_mid_request(&self) -> bool {
        self.state != DecodeState::AwaitingHeader
    }
}

impl Decoder for StackCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    match Header::parse(src.get_u8())? {
                        Header::Pop => return Ok(Some(Request::Pop)),
                        Header::Push(len) => {
                            src.reserve(len.saturating_sub(src.len()));
                            self.state = DecodeState::AwaitingPayload(len);
                        }
                    }
                }
                DecodeState::AwaitingPayload(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let data = src.split_to(len).freeze();
                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(Request::Push(Payload::from_checked(data))));
                }
            }
        }
    }

    /// A peer closing mid-request is not an error: the partial request is
    /// discarded and the stream simply ends.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(request) => Ok(Some(request)),
            None => {
                src.clear();
                self.state = DecodeState::AwaitingHeader;
                Ok(None)
            }
        }
    }
}

impl Encoder<Response> for StackCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}
