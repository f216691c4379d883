use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{ACCEPT_BACKOFF, ServerConfig};
use crate::protocol::{BUSY_BYTE, Response, StackCodec};
use crate::server::admission::{Admission, AdmissionController};
use crate::server::connection::{Connection, ConnectionError};
use crate::server::registry::{ConnectionId, Registry};
use crate::stack::{BoundedStack, StackStats};

/// How long a rejected socket is drained after the busy byte.
const REJECT_LINGER: Duration = Duration::from_millis(500);

/// TCP server for the stack protocol.
pub struct Server {
    listener: TcpListener,
    next_id: AtomicU64,
    admission: AdmissionController,
    reject_permits: Arc<Semaphore>,
    handle: ServerHandle,
}

/// Shared view of a running server: the stack and the live connections.
///
/// Cheap to clone; used by the control channel and by tests.
#[derive(Clone)]
pub struct ServerHandle {
    stack: BoundedStack,
    registry: Arc<Registry>,
    max_connections: usize,
}

/// Point-in-time server status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub stack: StackStats,
    pub connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stack={}/{} pending_push={} pending_pop={} connections={}/{}",
            self.stack.len,
            self.stack.capacity,
            self.stack.pending_pushes,
            self.stack.pending_pops,
            self.connections,
            self.max_connections
        )
    }
}

impl ServerHandle {
    pub fn stack(&self) -> &BoundedStack {
        &self.stack
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Clears the stack, cancels every waiter and terminates every connection.
    pub fn reset(&self) {
        self.stack.reset();
        let cancelled = self.registry.reset();
        info!(cancelled, "server state reset");
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            stack: self.stack.stats(),
            connections: self.registry.len(),
            max_connections: self.max_connections,
        }
    }
}

impl Server {
    /// Creates a new server with a given listener and configuration.
    ///
    /// # Panics
    ///
    /// Panics if `config.stack_capacity` is 0.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            listener,
            next_id: AtomicU64::new(1),
            admission: AdmissionController::new(registry.clone(), &config),
            reject_permits: Arc::new(Semaphore::new(config.max_lingering_rejections)),
            handle: ServerHandle {
                stack: BoundedStack::new(config.stack_capacity),
                registry,
                max_connections: config.max_connections,
            },
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections and serving clients.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        loop {
            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let accepted_at = Instant::now();
            let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
            if let Err(e) = socket.set_nodelay(true) {
                debug!(conn = %id, error = %e, "failed to set TCP_NODELAY");
            }

            let cancel_token = match self.admission.try_admit(id, accepted_at) {
                Admission::Admitted { cancel_token } => {
                    debug!(conn = %id, peer = %peer_addr, "connection admitted");
                    cancel_token
                }
                Admission::AdmittedWithEviction {
                    cancel_token,
                    evicted,
                    evicted_age,
                } => {
                    info!(
                        conn = %id,
                        peer = %peer_addr,
                        evicted = %evicted,
                        evicted_age_ms = evicted_age.as_millis() as u64,
                        "connection admitted after evicting oldest"
                    );
                    cancel_token
                }
                Admission::Rejected => {
                    info!(conn = %id, peer = %peer_addr, "connection limit reached, sending busy");
                    match self.reject_permits.clone().try_acquire_owned() {
                        Ok(permit) => {
                            tokio::spawn(reject(socket, permit));
                        }
                        Err(_) => {
                            debug!(conn = %id, "too many lingering rejections, closing at once");
                            reject_now(socket);
                        }
                    }
                    continue;
                }
            };

            let stack = self.handle.stack.clone();
            let registry = self.handle.registry.clone();
            let span = info_span!("conn", id = %id, peer = %peer_addr);

            tokio::spawn(
                async move {
                    let mut connection = Connection::new(socket, id, accepted_at, stack);
                    match connection.run(cancel_token).await {
                        Ok(termination) => {
                            debug!(
                                ?termination,
                                age_ms = connection.age().as_millis() as u64,
                                "connection closed"
                            );
                        }
                        Err(ConnectionError::Protocol(e)) => {
                            warn!(error = %e, "protocol violation, closing connection");
                        }
                        Err(ConnectionError::Stack(e)) => {
                            debug!(error = %e, "blocked operation cancelled by reset");
                        }
                        Err(ConnectionError::Io(e)) => {
                            debug!(error = %e, "connection I/O error");
                        }
                    }
                    registry.unregister(connection.id());
                }
                .instrument(span),
            );
        }
    }
}

/// Answers a rejected connection with the busy byte and closes it.
///
/// No request byte is read before the busy byte is written. Afterwards the
/// socket is drained briefly so the close does not turn into a reset. The
/// permit is held until the socket is released.
async fn reject(socket: TcpStream, _permit: OwnedSemaphorePermit) {
    let mut framed = Framed::new(socket, StackCodec::new());
    if let Err(e) = framed.send(Response::Busy).await {
        debug!(error = %e, "failed to send busy response");
        return;
    }

    let mut socket = framed.into_inner();
    if let Err(e) = socket.shutdown().await {
        debug!(error = %e, "failed to shut down rejected socket");
        return;
    }
    let drain = async {
        let mut scratch = [0u8; 128];
        while let Ok(n) = socket.read(&mut scratch).await {
            if n == 0 {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(REJECT_LINGER, drain).await;
}

/// Writes the busy byte without waiting and closes the socket.
fn reject_now(socket: TcpStream) {
    if let Err(e) = socket.try_write(&[BUSY_BYTE]) {
        debug!(error = %e, "failed to send busy response");
    }
}
