use thiserror::Error;

/// Why a promotion attempt came back empty. All of these resolve to `None`
/// through [`crate::WeakHandle::promote`]; the typed form exists so callers
/// can tell a dead owner from a lost race.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteError {
    #[error("weak node was invalidated; the owner has been finalized")]
    Invalidated,

    #[error("owner's strong count was observed at zero")]
    Dead,

    #[error("retry budget of {limit} exhausted while promoting; owner liveness unknown")]
    Contended { limit: usize },
}

/// Misuse of the raw-composition surface, caught and reported instead of
/// being left undefined.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("target pointer is null")]
    NullTarget,

    #[error("weak slot was never bound to its owner; construct through Handle::new or bind the slot first")]
    UnboundSlot,
}

impl PromoteError {
    #[cold]
    pub fn contended(limit: usize) -> Self {
        PromoteError::Contended { limit }
    }

    /// Whether retrying the promotion could still succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PromoteError::Contended { .. })
    }
}
