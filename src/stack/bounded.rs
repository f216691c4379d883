//! The bounded stack engine.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::StackError;
use super::waiter::{PendingPop, PendingPush, PopWaiter, PushWaiter, WaiterId};
use crate::protocol::Payload;

/// How a push was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The payload became the new top of the stack.
    Stored,
    /// The payload went straight to the oldest waiting pop.
    HandedOff,
}

/// Result of a non-blocking push attempt.
#[derive(Debug)]
pub enum PushAttempt {
    Done(PushOutcome),
    /// The stack was full; the push is queued behind earlier pushes.
    Queued(PendingPush),
}

/// Result of a non-blocking pop attempt.
#[derive(Debug)]
pub enum PopAttempt {
    Done(Payload),
    /// The stack was empty; the pop is queued behind earlier pops.
    Queued(PendingPop),
}

/// Point-in-time view of the engine, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackStats {
    pub len: usize,
    pub capacity: usize,
    pub pending_pushes: usize,
    pub pending_pops: usize,
}

/// Bounded LIFO stack with blocking, FIFO-fair push and pop.
///
/// # Resolution Rules
///
/// - A push first hands its payload to the oldest waiting pop. Only if no pop
///   is waiting does it store the payload, or queue if the stack is full.
/// - A pop takes the top entry if there is one, otherwise it queues. Taking
///   an entry frees a slot, which admits the oldest waiting push.
///
/// Because pops only wait on an empty stack and pushes only wait on a full
/// one, at most one of the two queues is non-empty at any time.
///
/// # Thread Safety
///
/// Entries and both queues are guarded by a single mutex that is never held
/// across an `.await`. Waiters block on their own oneshot slot, so a blocked
/// connection holds no engine lock.
#[derive(Clone)]
pub struct BoundedStack {
    shared: Arc<Shared>,
}

pub(super) struct Shared {
    capacity: usize,
    state: Mutex<StackState>,
}

#[derive(Default)]
struct StackState {
    /// Bottom at index 0, top at the end.
    entries: Vec<Payload>,
    push_waiters: VecDeque<PushWaiter>,
    pop_waiters: VecDeque<PopWaiter>,
    next_waiter_id: u64,
}

impl StackState {
    fn next_id(&mut self) -> WaiterId {
        let id = WaiterId(self.next_waiter_id);
        self.next_waiter_id += 1;
        id
    }

    /// Delivers `payload` to the oldest live pop waiter.
    ///
    /// Returns the payload back if no waiter could take it.
    fn hand_off(&mut self, mut payload: Payload) -> Result<WaiterId, Payload> {
        while let Some(waiter) = self.pop_waiters.pop_front() {
            match waiter.slot.send(payload) {
                Ok(()) => return Ok(waiter.id),
                // Receiver already gone; treat as cancelled and try the next one.
                Err(returned) => payload = returned,
            }
        }
        Err(payload)
    }

    /// Moves the oldest live push waiter onto the stack.
    fn admit_push_waiter(&mut self) -> Option<WaiterId> {
        while let Some(waiter) = self.push_waiters.pop_front() {
            if waiter.slot.send(()).is_ok() {
                self.entries.push(waiter.payload);
                return Some(waiter.id);
            }
        }
        None
    }
}

impl Shared {
    /// Removes a queued request. Returns false if it is no longer queued,
    /// i.e. it was fulfilled (or drained by a reset) first.
    pub(super) fn cancel(&self, id: WaiterId) -> bool {
        let mut state = self.state.lock();
        if let Some(pos) = state.push_waiters.iter().position(|w| w.id == id) {
            state.push_waiters.remove(pos);
            debug!(waiter = %id, "pending push cancelled");
            return true;
        }
        if let Some(pos) = state.pop_waiters.iter().position(|w| w.id == id) {
            state.pop_waiters.remove(pos);
            debug!(waiter = %id, "pending pop cancelled");
            return true;
        }
        false
    }
}

impl BoundedStack {
    /// Creates an empty stack holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(StackState {
                    entries: Vec::with_capacity(capacity),
                    ..StackState::default()
                }),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of entries resident on the stack.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StackStats {
        let state = self.shared.state.lock();
        StackStats {
            len: state.entries.len(),
            capacity: self.shared.capacity,
            pending_pushes: state.push_waiters.len(),
            pending_pops: state.pop_waiters.len(),
        }
    }

    /// Attempts a push without waiting.
    ///
    /// The queue position of a returned `PendingPush` is fixed by the time of
    /// this call.
    pub fn try_push(&self, payload: Payload) -> PushAttempt {
        let mut state = self.shared.state.lock();

        let payload = match state.hand_off(payload) {
            Ok(waiter) => {
                trace!(waiter = %waiter, "push handed off to pending pop");
                return PushAttempt::Done(PushOutcome::HandedOff);
            }
            Err(payload) => payload,
        };

        if state.entries.len() < self.shared.capacity {
            state.entries.push(payload);
            trace!(len = state.entries.len(), "push stored");
            return PushAttempt::Done(PushOutcome::Stored);
        }

        let id = state.next_id();
        let (tx, rx) = oneshot::channel();
        state.push_waiters.push_back(PushWaiter {
            id,
            payload,
            slot: tx,
        });
        debug!(waiter = %id, queued = state.push_waiters.len(), "stack full, push queued");
        PushAttempt::Queued(PendingPush::new(id, rx, self.shared.clone()))
    }

    /// Attempts a pop without waiting.
    pub fn try_pop(&self) -> PopAttempt {
        let mut state = self.shared.state.lock();

        if let Some(top) = state.entries.pop() {
            if let Some(admitted) = state.admit_push_waiter() {
                debug!(waiter = %admitted, "slot freed, pending push admitted");
            }
            trace!(len = state.entries.len(), "pop served from stack");
            return PopAttempt::Done(top);
        }

        let id = state.next_id();
        let (tx, rx) = oneshot::channel();
        state.pop_waiters.push_back(PopWaiter { id, slot: tx });
        debug!(waiter = %id, queued = state.pop_waiters.len(), "stack empty, pop queued");
        PopAttempt::Queued(PendingPop::new(id, rx, self.shared.clone()))
    }

    /// Pushes `payload`, waiting for capacity if the stack is full.
    ///
    /// Dropping the returned future while it waits cancels the push.
    ///
    /// # Errors
    ///
    /// Returns `StackError::Cancelled` if the stack is reset while waiting.
    pub async fn push(&self, payload: Payload) -> Result<PushOutcome, StackError> {
        match self.try_push(payload) {
            PushAttempt::Done(outcome) => Ok(outcome),
            PushAttempt::Queued(pending) => {
                pending.await?;
                Ok(PushOutcome::Stored)
            }
        }
    }

    /// Pops the top entry, waiting for a push if the stack is empty.
    ///
    /// Dropping the returned future while it waits cancels the pop.
    ///
    /// # Errors
    ///
    /// Returns `StackError::Cancelled` if the stack is reset while waiting.
    pub async fn pop(&self) -> Result<Payload, StackError> {
        match self.try_pop() {
            PopAttempt::Done(payload) => Ok(payload),
            PopAttempt::Queued(pending) => pending.await,
        }
    }

    /// Removes a queued request by id.
    ///
    /// Returns `false` if the request was already fulfilled or is unknown.
    pub fn cancel(&self, id: WaiterId) -> bool {
        self.shared.cancel(id)
    }

    /// Empties the stack and both wait queues.
    ///
    /// Every drained waiter resolves with `StackError::Cancelled`.
    pub fn reset(&self) {
        let (entries, pushes, pops) = {
            let mut state = self.shared.state.lock();
            let entries = state.entries.len();
            let pushes = std::mem::take(&mut state.push_waiters);
            let pops = std::mem::take(&mut state.pop_waiters);
            state.entries.clear();
            (entries, pushes, pops)
        };
        debug!(
            entries,
            pending_pushes = pushes.len(),
            pending_pops = pops.len(),
            "stack reset"
        );
        // Dropping the senders outside the lock wakes each waiter with a
        // cancellation.
        drop(pushes);
        drop(pops);
    }
}

impl std::fmt::Debug for BoundedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStack")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn payload(s: &str) -> Payload {
        Payload::new(s.as_bytes().to_vec()).unwrap()
    }

    fn fill(stack: &BoundedStack, n: usize) -> Vec<Payload> {
        (0..n)
            .map(|i| {
                let p = payload(&format!("entry-{}", i));
                assert!(matches!(
                    stack.try_push(p.clone()),
                    PushAttempt::Done(PushOutcome::Stored)
                ));
                p
            })
            .collect()
    }

    fn expect_done(attempt: PopAttempt) -> Payload {
        match attempt {
            PopAttempt::Done(p) => p,
            PopAttempt::Queued(_) => panic!("pop should not block"),
        }
    }

    #[tokio::test]
    async fn test_lifo_order() {
        let stack = BoundedStack::new(100);
        stack.push(payload("ab")).await.unwrap();
        stack.push(payload("cd")).await.unwrap();
        assert_eq!(stack.pop().await.unwrap(), payload("cd"));
        assert_eq!(stack.pop().await.unwrap(), payload("ab"));
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_full_stack_reverse_order() {
        let stack = BoundedStack::new(100);
        let pushed = fill(&stack, 100);
        assert_eq!(stack.len(), 100);
        for expected in pushed.iter().rev() {
            assert_eq!(&expect_done(stack.try_pop()), expected);
        }
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_push_on_full_stack_queues() {
        let stack = BoundedStack::new(3);
        fill(&stack, 3);

        let PushAttempt::Queued(pending) = stack.try_push(payload("late")) else {
            panic!("push should block on a full stack");
        };
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.stats().pending_pushes, 1);

        // Popping frees a slot, which the pending push takes immediately.
        assert_eq!(expect_done(stack.try_pop()), payload("entry-2"));
        assert_eq!(stack.len(), 3);
        pending.await.unwrap();

        assert_eq!(expect_done(stack.try_pop()), payload("late"));
        assert_eq!(expect_done(stack.try_pop()), payload("entry-1"));
    }

    #[tokio::test]
    async fn test_pending_pushes_admitted_in_queue_order() {
        let stack = BoundedStack::new(1);
        fill(&stack, 1);

        let PushAttempt::Queued(first) = stack.try_push(payload("first")) else {
            panic!("expected queued push");
        };
        let PushAttempt::Queued(second) = stack.try_push(payload("second")) else {
            panic!("expected queued push");
        };

        assert_eq!(expect_done(stack.try_pop()), payload("entry-0"));
        first.await.unwrap();
        assert_eq!(stack.stats().pending_pushes, 1);

        assert_eq!(expect_done(stack.try_pop()), payload("first"));
        second.await.unwrap();
        assert_eq!(expect_done(stack.try_pop()), payload("second"));
    }

    #[tokio::test]
    async fn test_hand_off_bypasses_stack() {
        let stack = BoundedStack::new(100);

        let PopAttempt::Queued(pending) = stack.try_pop() else {
            panic!("pop should block on an empty stack");
        };
        let outcome = stack.push(payload("direct")).await.unwrap();
        assert_eq!(outcome, PushOutcome::HandedOff);
        assert_eq!(stack.len(), 0);
        assert_eq!(pending.await.unwrap(), payload("direct"));

        // The handed-off payload never becomes separately observable.
        assert!(matches!(stack.try_pop(), PopAttempt::Queued(_)));
    }

    #[tokio::test]
    async fn test_pending_pops_served_fifo() {
        let stack = BoundedStack::new(100);
        let PopAttempt::Queued(first) = stack.try_pop() else {
            panic!("expected queued pop");
        };
        let PopAttempt::Queued(second) = stack.try_pop() else {
            panic!("expected queued pop");
        };

        stack.push(payload("one")).await.unwrap();
        stack.push(payload("two")).await.unwrap();

        assert_eq!(first.await.unwrap(), payload("one"));
        assert_eq!(second.await.unwrap(), payload("two"));
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let stack = BoundedStack::new(100);
        let waiter = {
            let stack = stack.clone();
            tokio::spawn(async move { stack.pop().await })
        };

        while stack.stats().pending_pops == 0 {
            tokio::task::yield_now().await;
        }
        stack.push(payload("later")).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), payload("later"));
    }

    #[tokio::test]
    async fn test_cancelled_push_never_lands() {
        let stack = BoundedStack::new(2);
        fill(&stack, 2);

        let PushAttempt::Queued(pending) = stack.try_push(payload("ghost")) else {
            panic!("expected queued push");
        };
        assert!(pending.cancel());
        assert_eq!(stack.stats().pending_pushes, 0);

        assert_eq!(expect_done(stack.try_pop()), payload("entry-1"));
        assert_eq!(stack.len(), 1);
        assert_eq!(expect_done(stack.try_pop()), payload("entry-0"));
        assert!(matches!(stack.try_pop(), PopAttempt::Queued(_)));
    }

    #[tokio::test]
    async fn test_dropped_push_future_cancels() {
        let stack = BoundedStack::new(1);
        fill(&stack, 1);

        let result =
            tokio::time::timeout(Duration::from_millis(10), stack.push(payload("gone"))).await;
        assert!(result.is_err());
        assert_eq!(stack.stats().pending_pushes, 0);

        expect_done(stack.try_pop());
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_pop_does_not_swallow_push() {
        let stack = BoundedStack::new(10);
        {
            let PopAttempt::Queued(_pending) = stack.try_pop() else {
                panic!("expected queued pop");
            };
        }
        assert_eq!(stack.stats().pending_pops, 0);

        let outcome = stack.push(payload("kept")).await.unwrap();
        assert_eq!(outcome, PushOutcome::Stored);
        assert_eq!(stack.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_fulfilment_loses() {
        let stack = BoundedStack::new(10);
        let PopAttempt::Queued(pending) = stack.try_pop() else {
            panic!("expected queued pop");
        };
        let id = pending.id();
        stack.push(payload("raced")).await.unwrap();

        assert!(!stack.cancel(id));
        assert_eq!(pending.cancel(), Some(payload("raced")));
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_push_after_admission_loses() {
        let stack = BoundedStack::new(1);
        fill(&stack, 1);
        let PushAttempt::Queued(pending) = stack.try_push(payload("admitted")) else {
            panic!("expected queued push");
        };

        assert_eq!(expect_done(stack.try_pop()), payload("entry-0"));
        assert!(!pending.cancel());

        // The admitted entry stays on the stack.
        assert_eq!(stack.len(), 1);
        assert_eq!(expect_done(stack.try_pop()), payload("admitted"));
    }

    #[tokio::test]
    async fn test_cancel_by_id() {
        let stack = BoundedStack::new(10);
        let PopAttempt::Queued(pending) = stack.try_pop() else {
            panic!("expected queued pop");
        };
        assert!(stack.cancel(pending.id()));
        assert!(!stack.cancel(pending.id()));
        assert_eq!(pending.await, Err(StackError::Cancelled));
    }

    #[tokio::test]
    async fn test_reset_cancels_waiters() {
        let stack = BoundedStack::new(1);
        fill(&stack, 1);
        let PushAttempt::Queued(pending) = stack.try_push(payload("blocked")) else {
            panic!("expected queued push");
        };

        stack.reset();
        assert_eq!(pending.await, Err(StackError::Cancelled));
        assert_eq!(
            stack.stats(),
            StackStats {
                len: 0,
                capacity: 1,
                pending_pushes: 0,
                pending_pops: 0,
            }
        );

        let PopAttempt::Queued(pending) = stack.try_pop() else {
            panic!("expected queued pop");
        };
        stack.reset();
        assert_eq!(pending.await, Err(StackError::Cancelled));
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded_under_contention() {
        let stack = BoundedStack::new(10);
        let mut tasks = Vec::new();
        for i in 0..50 {
            let stack = stack.clone();
            tasks.push(tokio::spawn(async move {
                stack.push(payload(&format!("p{}", i))).await.unwrap();
            }));
        }
        for _ in 0..50 {
            assert!(stack.len() <= 10);
            stack.pop().await.unwrap();
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(stack.is_empty());
        assert_eq!(stack.stats().pending_pushes, 0);
    }
}
