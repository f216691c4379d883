mod error;

pub use error::ConnectionError;

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::{Payload, Request, Response, StackCodec};
use crate::server::registry::ConnectionId;
use crate::stack::{BoundedStack, PopAttempt, PushAttempt};

/// How a connection ended, when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The response was written.
    Responded,
    /// The stack operation took effect but the response could not be written.
    /// The operation is not undone.
    ResponseLost,
    /// The peer closed before its request completed, or while it was blocked.
    PeerClosed,
    /// The server terminated the connection (eviction or reset).
    Cancelled,
}

/// Outcome of waiting on a blocked stack operation.
enum Wait<T> {
    Resolved(T),
    PeerClosed,
    Cancelled,
}

/// A single client connection.
///
/// Reads one request, performs it against the stack (possibly blocking),
/// writes the response and ends. While blocked, the connection watches both
/// its socket and its cancellation token; if either fires, the pending stack
/// operation is cancelled before the socket is released.
pub struct Connection {
    framed: Framed<TcpStream, StackCodec>,
    id: ConnectionId,
    accepted_at: Instant,
    stack: BoundedStack,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        id: ConnectionId,
        accepted_at: Instant,
        stack: BoundedStack,
    ) -> Self {
        Self {
            framed: Framed::new(socket, StackCodec::new()),
            id,
            accepted_at,
            stack,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    pub async fn run(
        &mut self,
        cancel_token: CancellationToken,
    ) -> Result<Termination, ConnectionError> {
        let request = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!(
                    mid_request = self.framed.codec().is_mid_request(),
                    "cancelled while reading request"
                );
                return Ok(Termination::Cancelled);
            }
            frame = self.framed.next() => match frame {
                Some(frame) => frame?,
                None => {
                    debug!("peer closed before request was complete");
                    return Ok(Termination::PeerClosed);
                }
            },
        };

        let outcome = match request {
            Request::Push(payload) => self.handle_push(payload, &cancel_token).await?,
            Request::Pop => self.handle_pop(&cancel_token).await?,
        };

        let response = match outcome {
            Wait::Resolved(response) => response,
            Wait::PeerClosed => return Ok(Termination::PeerClosed),
            Wait::Cancelled => return Ok(Termination::Cancelled),
        };

        match self.framed.send(response).await {
            Ok(()) => Ok(Termination::Responded),
            Err(e) => {
                debug!(error = %e, "response could not be delivered");
                Ok(Termination::ResponseLost)
            }
        }
    }

    async fn handle_push(
        &mut self,
        payload: Payload,
        cancel_token: &CancellationToken,
    ) -> Result<Wait<Response>, ConnectionError> {
        if cancel_token.is_cancelled() {
            return Ok(Wait::Cancelled);
        }
        let len = payload.len();
        let mut pending = match self.stack.try_push(payload) {
            PushAttempt::Done(outcome) => {
                debug!(len, ?outcome, "push");
                return Ok(Wait::Resolved(Response::Pushed));
            }
            PushAttempt::Queued(pending) => pending,
        };
        debug!(len, waiter = %pending.id(), "push blocked on full stack");

        match wait_blocked(&mut self.framed, &mut pending, cancel_token).await {
            Wait::Resolved(result) => {
                result?;
                debug!(len, "blocked push admitted");
                Ok(Wait::Resolved(Response::Pushed))
            }
            Wait::PeerClosed => {
                if !pending.cancel() {
                    debug!("push was admitted before the peer closed");
                }
                Ok(Wait::PeerClosed)
            }
            Wait::Cancelled => {
                pending.cancel();
                Ok(Wait::Cancelled)
            }
        }
    }

    async fn handle_pop(
        &mut self,
        cancel_token: &CancellationToken,
    ) -> Result<Wait<Response>, ConnectionError> {
        if cancel_token.is_cancelled() {
            return Ok(Wait::Cancelled);
        }
        let mut pending = match self.stack.try_pop() {
            PopAttempt::Done(payload) => {
                debug!(len = payload.len(), "pop");
                return Ok(Wait::Resolved(Response::Popped(payload)));
            }
            PopAttempt::Queued(pending) => pending,
        };
        debug!(waiter = %pending.id(), "pop blocked on empty stack");

        let closed = match wait_blocked(&mut self.framed, &mut pending, cancel_token).await {
            Wait::Resolved(result) => {
                let payload = result?;
                debug!(len = payload.len(), "blocked pop received hand-off");
                return Ok(Wait::Resolved(Response::Popped(payload)));
            }
            Wait::PeerClosed => Wait::PeerClosed,
            Wait::Cancelled => Wait::Cancelled,
        };
        if let Some(payload) = pending.cancel() {
            debug!(len = payload.len(), "handed-off payload dropped undelivered");
        }
        Ok(closed)
    }
}

/// Waits for a blocked stack operation, the peer closing, or cancellation.
///
/// Fulfilment is checked first so that an operation that already took effect
/// is still answered.
async fn wait_blocked<F>(
    framed: &mut Framed<TcpStream, StackCodec>,
    pending: &mut F,
    cancel_token: &CancellationToken,
) -> Wait<F::Output>
where
    F: Future + Unpin,
{
    tokio::select! {
        biased;
        result = pending => Wait::Resolved(result),
        _ = cancel_token.cancelled() => Wait::Cancelled,
        _ = peer_closed(framed.get_mut()) => Wait::PeerClosed,
    }
}

/// Resolves once the peer has closed the connection.
///
/// Anything the peer sends after its request is read and ignored.
async fn peer_closed(stream: &mut TcpStream) {
    let mut scratch = [0u8; 128];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) => return,
            Ok(n) => trace!(bytes = n, "ignoring bytes after complete request"),
            Err(e) => {
                trace!(error = %e, "read failed while blocked");
                return;
            }
        }
    }
}
