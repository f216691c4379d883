/// Protocol parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A push header announced a zero-length payload.
    #[error("push request cannot be empty")]
    EmptyPush,
    #[error("payload length {0} out of range 1..=127")]
    PayloadLength(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
