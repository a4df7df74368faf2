use std::{fmt::Debug, time::Duration};

pub type LockResult<T, K> = Result<T, LockError<K>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError<K>
where
    K: Debug,
{
    /// Acquiring `requested` while holding `held` would break ascending order.
    #[error("deadlock prevented: holding {held:?}, requested {requested:?}")]
    DeadlockPrevented { held: K, requested: K },
    #[error("timed out after {timeout:?} waiting for {id:?}")]
    TimedOut { id: K, timeout: Duration },
}

impl<K> LockError<K>
where
    K: Debug,
{
    pub fn id(&self) -> &K {
        match self {
            LockError::DeadlockPrevented { requested, .. } => requested,
            LockError::TimedOut { id, .. } => id,
        }
    }

    /// Timeouts are transient; a deadlock-prevented error means the caller
    /// must change its acquisition order.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::TimedOut { .. })
    }
}
