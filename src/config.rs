//! Server sizing and operational configuration.
//!
//! Wire-level limits (e.g. `MAX_PAYLOAD_LEN`) live in `protocol`; this module
//! only holds the tunables the operator may override at startup.

use std::net::SocketAddr;
use std::time::Duration;

/// Maximum number of entries resident on the stack.
pub const DEFAULT_STACK_CAPACITY: usize = 100;

/// Maximum number of simultaneously admitted client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Age after which the oldest connection may be evicted in favour of a new one.
pub const DEFAULT_EVICTION_AGE: Duration = Duration::from_secs(10);

/// Rejected sockets that may linger at once before busy replies stop lingering.
pub const DEFAULT_MAX_LINGERING_REJECTIONS: usize = 64;

/// How long the control listener waits for a command before giving up.
pub const CONTROL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a failed `accept()` (e.g. EMFILE) before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub const DEFAULT_SERVICE_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:8081";

/// Runtime configuration shared by the stack engine and the acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Hard ceiling on resident stack entries.
    pub stack_capacity: usize,
    /// Connection ceiling enforced by admission.
    pub max_connections: usize,
    /// Minimum age of the oldest connection before it can be evicted.
    pub eviction_age: Duration,
    /// Ceiling on rejected sockets held open to drain after the busy byte.
    /// Past it, the busy byte is written and the socket closed at once.
    pub max_lingering_rejections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            eviction_age: DEFAULT_EVICTION_AGE,
            max_lingering_rejections: DEFAULT_MAX_LINGERING_REJECTIONS,
        }
    }
}

impl ServerConfig {
    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        Ok(())
    }
}

/// Maps a `LOG_LEVEL` value to a tracing filter directive.
///
/// Only `info` and `error` are recognised; anything else, including an unset
/// variable, logs at debug.
pub fn log_level_directive(level: Option<&str>) -> &'static str {
    match level {
        Some("info") => "info",
        Some("error") => "error",
        _ => "debug",
    }
}

/// Addresses the binary binds to.
#[derive(Debug, Clone, Copy)]
pub struct ListenConfig {
    pub service: SocketAddr,
    pub control: SocketAddr,
}

/// Rejected configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("stack capacity must be at least 1")]
    ZeroCapacity,
    #[error("max connections must be at least 1")]
    ZeroConnections,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_protocol_limits() {
        let config = ServerConfig::default();
        assert_eq!(config.stack_capacity, 100);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.eviction_age, Duration::from_secs(10));
        assert_eq!(config.max_lingering_rejections, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = ServerConfig {
            stack_capacity: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroConnections));
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(log_level_directive(Some("info")), "info");
        assert_eq!(log_level_directive(Some("error")), "error");
        assert_eq!(log_level_directive(Some("warn")), "debug");
        assert_eq!(log_level_directive(Some("")), "debug");
        assert_eq!(log_level_directive(None), "debug");
    }
}
