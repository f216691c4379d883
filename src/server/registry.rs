use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Identifies an accepted connection.
///
/// Ids are handed out by the acceptor in acceptance order, so ordering by id
/// is ordering by acceptance time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registry of live connections, ordered by acceptance.
///
/// Each entry owns the cancellation token of its session. Removing an entry
/// happens exactly once: whichever of eviction, reset or the session's own
/// teardown gets there first wins, and the others become no-ops.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<Connections>,
}

/// The locked view of the registry.
#[derive(Default)]
pub struct Connections {
    entries: BTreeMap<ConnectionId, ConnectionHandle>,
}

struct ConnectionHandle {
    accepted_at: Instant,
    cancel_token: CancellationToken,
}

impl Connections {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the connection accepted earliest.
    pub fn oldest(&self) -> Option<(ConnectionId, Instant)> {
        self.entries
            .first_key_value()
            .map(|(id, handle)| (*id, handle.accepted_at))
    }

    /// Inserts a connection and returns the token that terminates it.
    pub fn insert(&mut self, id: ConnectionId, accepted_at: Instant) -> CancellationToken {
        let token = CancellationToken::new();
        self.entries.insert(
            id,
            ConnectionHandle {
                accepted_at,
                cancel_token: token.clone(),
            },
        );
        token
    }

    /// Removes a connection and signals its session to stop.
    pub fn evict(&mut self, id: ConnectionId) -> bool {
        match self.entries.remove(&id) {
            Some(handle) => {
                handle.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes a connection without signalling it.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.entries.remove(&id).is_some()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with the registry locked.
    ///
    /// Used by admission so that the size check, eviction and insertion form
    /// one atomic step.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut Connections) -> R) -> R {
        f(&mut self.connections.lock())
    }

    /// Registers a new connection and returns a cancellation token for it.
    #[cfg(test)]
    pub fn register(&self, id: ConnectionId, accepted_at: Instant) -> CancellationToken {
        self.connections.lock().insert(id, accepted_at)
    }

    /// Unregisters a connection when it terminates.
    ///
    /// Returns `false` if it had already been removed by eviction or reset.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id)
    }

    /// Cancels and removes a single connection.
    #[cfg(test)]
    pub fn evict(&self, id: ConnectionId) -> bool {
        self.connections.lock().evict(id)
    }

    /// Cancels every registered connection and empties the registry.
    ///
    /// Returns the number of connections that were cancelled.
    pub fn reset(&self) -> usize {
        let drained = std::mem::take(&mut self.connections.lock().entries);
        for handle in drained.values() {
            handle.cancel_token.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
