//! Bounded LIFO stack shared by every connection.
//!
//! The stack holds at most `capacity` entries. Requests that cannot be
//! satisfied immediately wait in one of two FIFO queues until another request
//! resolves them, or until they are cancelled.
//!
//! # Architecture
//!
//! ```text
//!          push                      pop
//!            |                        |
//!            v                        v
//! +----------------------------------------------+
//! | BoundedStack (single mutex)                  |
//! |                                              |
//! |  pop waiters  <-- hand-off --  push          |
//! |  entries [bottom .. top]                     |
//! |  push waiters --- admitted --> entries       |
//! +----------------------------------------------+
//!            |                        |
//!            v                        v
//!      PendingPush              PendingPop    <- oneshot result slots
//! ```
//!
//! # Terminology
//!
//! - **Hand-off**: a push delivered straight to the oldest waiting pop; the
//!   payload never becomes resident on the stack.
//! - **Pending push / pop**: a request queued because the stack was full / empty.
//! - **Cancellation**: removal of a pending request by its owner. Exactly one
//!   of fulfilment and cancellation takes effect.

pub mod bounded;
pub mod error;
pub mod waiter;

pub use bounded::{BoundedStack, PopAttempt, PushAttempt, PushOutcome, StackStats};
pub use error::StackError;
pub use waiter::{PendingPop, PendingPush, WaiterId};
