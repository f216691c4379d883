//! TCP server for the stack protocol.
//!
//! This module provides the network layer that admits client connections
//! and drives each one through a single request against the shared stack.
//!
//! ## Architecture
//!
//! ```text
//! +--------+     +-----------+     +----------+
//! | Server | --> | Admission | <-> | Registry |  <- live connections by age
//! +--------+     +-----------+     +----------+
//!      |
//!      v
//! +------------+     +--------------+
//! | Connection | --> | BoundedStack |  <- may block until resolved
//! +------------+     +--------------+
//!
//! +---------------+
//! | ControlServer |  <- reset / status on a second port
//! +---------------+
//! ```
//!
//! ## Terminology
//!
//! - **Server**: TCP listener that adjudicates and spawns connections
//! - **Admission**: Connection ceiling with oldest-connection eviction
//! - **Registry**: Tracks live connections and their cancellation tokens
//! - **Connection**: Per-client session serving one push or pop

pub mod admission;
pub mod connection;
pub mod control;
pub mod listener;
pub mod registry;

pub use control::ControlServer;
pub use listener::{Server, ServerHandle, ServerStatus};
