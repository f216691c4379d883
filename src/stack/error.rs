//! Stack engine errors.

/// Stack engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    /// The pending request was cancelled before it could be fulfilled.
    ///
    /// This is observed by the waiter when the stack is reset while it is
    /// queued. Owners that cancel their own request never see it.
    #[error("pending stack operation was cancelled")]
    Cancelled,
}
