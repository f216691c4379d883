use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::server::registry::{ConnectionId, Registry};

/// Outcome of adjudicating a newly accepted connection.
#[derive(Debug)]
pub enum Admission {
    /// Below the ceiling; the connection was registered.
    Admitted { cancel_token: CancellationToken },
    /// At the ceiling, but the oldest connection was stale. It has been
    /// removed and cancelled, and the new connection registered in its place.
    AdmittedWithEviction {
        cancel_token: CancellationToken,
        evicted: ConnectionId,
        evicted_age: Duration,
    },
    /// At the ceiling with no stale connection. Registry unchanged; the
    /// caller answers with the busy byte.
    Rejected,
}

/// Gates new connections against the connection ceiling.
///
/// Eviction is evaluated only here, when a new connection arrives. There is
/// no background sweep: an old connection is never closed unless a newcomer
/// would otherwise be turned away.
pub struct AdmissionController {
    registry: Arc<Registry>,
    max_connections: usize,
    eviction_age: Duration,
}

impl AdmissionController {
    pub fn new(registry: Arc<Registry>, config: &ServerConfig) -> Self {
        Self {
            registry,
            max_connections: config.max_connections,
            eviction_age: config.eviction_age,
        }
    }

    /// Decides whether connection `id`, accepted at `now`, may be served.
    pub fn try_admit(&self, id: ConnectionId, now: Instant) -> Admission {
        self.registry.with_locked(|conns| {
            if conns.len() < self.max_connections {
                return Admission::Admitted {
                    cancel_token: conns.insert(id, now),
                };
            }

            let Some((oldest, accepted_at)) = conns.oldest() else {
                return Admission::Rejected;
            };
            let age = now.saturating_duration_since(accepted_at);
            if age < self.eviction_age {
                return Admission::Rejected;
            }

            conns.evict(oldest);
            Admission::AdmittedWithEviction {
                cancel_token: conns.insert(id, now),
                evicted: oldest,
                evicted_age: age,
            }
        })
    }
}
