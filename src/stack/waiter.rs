//! Pending push/pop handles.
//!
//! A handle is the waiting side of a queued request. It resolves when the
//! engine fulfils the request, and removes the request from its queue when
//! cancelled or dropped unresolved.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::StackError;
use super::bounded::Shared;
use crate::protocol::Payload;

/// Identifies a queued request. Unique across both wait queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(pub(super) u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Engine-side record of a queued push.
pub(super) struct PushWaiter {
    pub id: WaiterId,
    pub payload: Payload,
    pub slot: oneshot::Sender<()>,
}

/// Engine-side record of a queued pop.
pub(super) struct PopWaiter {
    pub id: WaiterId,
    pub slot: oneshot::Sender<Payload>,
}

/// A push waiting for stack capacity.
///
/// Awaiting the handle yields `Ok(())` once the payload is on the stack.
/// Dropping an unresolved handle cancels the push; its payload never reaches
/// the stack.
pub struct PendingPush {
    id: WaiterId,
    slot: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    settled: bool,
}

impl PendingPush {
    pub(super) fn new(id: WaiterId, slot: oneshot::Receiver<()>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            slot,
            shared,
            settled: false,
        }
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Withdraws the push from the wait queue.
    ///
    /// Returns `false` if the push had already been admitted to the stack, in
    /// which case the stack keeps the entry.
    pub fn cancel(mut self) -> bool {
        self.settled = true;
        self.shared.cancel(self.id)
    }
}

impl Future for PendingPush {
    type Output = Result<(), StackError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.slot).poll(cx) {
            Poll::Ready(result) => {
                this.settled = true;
                Poll::Ready(result.map_err(|_| StackError::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingPush {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.cancel(self.id);
        }
    }
}

/// A pop waiting for an entry.
///
/// Awaiting the handle yields the payload of the push that was handed to it.
/// Dropping an unresolved handle cancels the pop.
pub struct PendingPop {
    id: WaiterId,
    slot: oneshot::Receiver<Payload>,
    shared: Arc<Shared>,
    settled: bool,
}

impl PendingPop {
    pub(super) fn new(
        id: WaiterId,
        slot: oneshot::Receiver<Payload>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            slot,
            shared,
            settled: false,
        }
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Withdraws the pop from the wait queue.
    ///
    /// Returns `None` if the pop was cancelled. If a push had already been
    /// handed to it, the payload is returned; it is consumed either way and
    /// never reappears on the stack.
    pub fn cancel(mut self) -> Option<Payload> {
        self.settled = true;
        if self.shared.cancel(self.id) {
            return None;
        }
        self.slot.try_recv().ok()
    }
}

impl Future for PendingPop {
    type Output = Result<Payload, StackError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.slot).poll(cx) {
            Poll::Ready(result) => {
                this.settled = true;
                Poll::Ready(result.map_err(|_| StackError::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingPop {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.cancel(self.id);
        }
    }
}

impl fmt::Debug for PendingPush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPush").field("id", &self.id).finish()
    }
}

impl fmt::Debug for PendingPop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPop").field("id", &self.id).finish()
    }
}
