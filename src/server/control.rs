use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::config::{ACCEPT_BACKOFF, CONTROL_READ_TIMEOUT};
use crate::server::listener::ServerHandle;

/// Length of every control command.
const COMMAND_LEN: usize = 3;

/// Commands accepted on the control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// `rel`: clear the stack and drop every connection.
    Reset,
    /// `sta`: write a one-line status report.
    Status,
}

impl ControlCommand {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"rel" => Some(ControlCommand::Reset),
            b"sta" => Some(ControlCommand::Status),
            _ => None,
        }
    }
}

/// Text control channel used by ops and test tooling.
///
/// Not subject to admission; each connection carries one 3-byte command.
pub struct ControlServer {
    listener: TcpListener,
    handle: ServerHandle,
}

impl ControlServer {
    pub fn new(listener: TcpListener, handle: ServerHandle) -> Self {
        Self { listener, handle }
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Result<(), io::Error> {
        loop {
            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept control connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            info!(peer = %peer_addr, "control connection accepted");
            let handle = self.handle.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_command(socket, &handle).await {
                    warn!(peer = %peer_addr, error = %e, "control command failed");
                }
            });
        }
    }
}

async fn handle_command(mut socket: TcpStream, handle: &ServerHandle) -> io::Result<()> {
    let mut buf = [0u8; COMMAND_LEN];
    match tokio::time::timeout(CONTROL_READ_TIMEOUT, socket.read_exact(&mut buf)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            warn!("control command timed out");
            return Ok(());
        }
    }

    match ControlCommand::parse(&buf) {
        Some(ControlCommand::Reset) => {
            info!("reset requested");
            handle.reset();
        }
        Some(ControlCommand::Status) => {
            let line = format!("{}\n", handle.status());
            socket.write_all(line.as_bytes()).await?;
            socket.flush().await?;
        }
        None => {
            warn!(command = %String::from_utf8_lossy(&buf), "unknown control command");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse(b"rel"), Some(ControlCommand::Reset));
        assert_eq!(ControlCommand::parse(b"sta"), Some(ControlCommand::Status));
        assert_eq!(ControlCommand::parse(b"REL"), None);
        assert_eq!(ControlCommand::parse(b"re"), None);
    }
}
