use std::{fmt::Debug, hash::Hash, time::Duration};

use crate::{
    error::{LockError, LockResult},
    ordering::OrderingGuard,
    registry::Registry,
};

/// Serializes operations keyed by the same entity id.
///
/// Operations on different ids run in parallel. A thread that holds id `x` may
/// only go on to lock ids `>= x`; anything smaller fails with
/// [`LockError::DeadlockPrevented`] before blocking. Locks are reentrant.
///
/// ```
/// use entity_locker::EntityLocker;
///
/// let locker = EntityLocker::new();
/// let total = locker
///     .with_lock(10, || locker.with_lock(20, || 10 + 20))
///     .unwrap()
///     .unwrap();
/// assert_eq!(total, 30);
/// assert!(locker.is_empty());
/// ```
#[derive(Debug)]
pub struct EntityLocker<K>
where
    K: Ord + Hash + Clone + Debug,
{
    registry: Registry<K>,
    ordering: OrderingGuard<K>,
}

impl<K> EntityLocker<K>
where
    K: Ord + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            ordering: OrderingGuard::new(),
        }
    }

    /// Runs `f` while holding `id`, blocking until it is available.
    pub fn with_lock<T, F>(&self, id: K, f: F) -> LockResult<T, K>
    where
        F: FnOnce() -> T,
    {
        self.run(id, None, f)
    }

    /// Runs `f` while holding `id`, giving up with [`LockError::TimedOut`] if
    /// the lock isn't acquired within `timeout`. `f` is not run in that case.
    pub fn with_lock_timeout<T, F>(&self, id: K, timeout: Duration, f: F) -> LockResult<T, K>
    where
        F: FnOnce() -> T,
    {
        self.run(id, Some(timeout), f)
    }

    /// Like [`with_lock_timeout`](Self::with_lock_timeout) with a zero timeout.
    pub fn try_with_lock<T, F>(&self, id: K, f: F) -> LockResult<T, K>
    where
        F: FnOnce() -> T,
    {
        self.run(id, Some(Duration::from_secs(0)), f)
    }

    /// Largest id held by the calling thread, if any.
    pub fn held_by_current_thread(&self) -> Option<K> {
        self.ordering.current()
    }

    /// Number of ids currently held or waited on.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn run<T, F>(&self, id: K, timeout: Option<Duration>, f: F) -> LockResult<T, K>
    where
        F: FnOnce() -> T,
    {
        if let Err(err) = self.ordering.check(&id) {
            tracing::warn!(id = ?id, "{}", err);
            return Err(err);
        }

        // Drop order below is the release order: ordering state, then the
        // record lock, then the lease.
        let lease = self.registry.lease(id.clone());
        let _held = match timeout {
            None => lease.lock().lock(),
            Some(timeout) => {
                let held = if timeout == Duration::from_secs(0) {
                    lease.lock().try_lock()
                } else {
                    lease.lock().try_lock_for(timeout)
                };
                match held {
                    Some(held) => held,
                    None => {
                        let err = LockError::TimedOut { id, timeout };
                        tracing::warn!("{}", err);
                        return Err(err);
                    }
                }
            }
        };
        tracing::trace!(id = ?id, "Acquired lock");
        let _restore = self.ordering.remember(id);

        Ok(f())
    }
}

impl<K> Default for EntityLocker<K>
where
    K: Ord + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
