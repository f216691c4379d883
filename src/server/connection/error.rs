use crate::protocol::ProtocolError;
use crate::stack::StackError;

/// Connection error types.
///
/// All of these are local to one connection; the server keeps serving others.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => ConnectionError::Io(e),
            e => ConnectionError::Protocol(e),
        }
    }
}
