use std::{
    fmt::Debug,
    hash::Hash,
    thread::{self, ThreadId},
};

use dashmap::DashMap;

use crate::error::LockError;

/// Tracks the largest id each thread currently holds.
///
/// A thread has an entry only while it holds at least one id, so every thread
/// starts (and ends up again, once idle) with nothing recorded.
#[derive(Debug)]
pub(crate) struct OrderingGuard<K>(DashMap<ThreadId, K>);

impl<K> OrderingGuard<K>
where
    K: Ord + Clone + Debug,
{
    pub fn new() -> Self {
        Self(DashMap::new())
    }

    pub fn current(&self) -> Option<K> {
        self.0
            .get(&thread::current().id())
            .map(|held| held.value().clone())
    }

    /// Rejects `id` if the calling thread already holds a larger one.
    pub fn check(&self, id: &K) -> Result<(), LockError<K>> {
        match self.current() {
            Some(held) if *id < held => Err(LockError::DeadlockPrevented {
                held,
                requested: id.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Records `id` as the calling thread's maximum until the returned guard drops.
    pub fn remember(&self, id: K) -> Restore<'_, K> {
        let thread = thread::current().id();
        let previous = self.0.insert(thread, id);
        Restore {
            ordering: self,
            thread,
            previous,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Restore<'a, K>
where
    K: Ord + Clone + Debug,
{
    ordering: &'a OrderingGuard<K>,
    thread: ThreadId,
    previous: Option<K>,
}

impl<K> Drop for Restore<'_, K>
where
    K: Ord + Clone + Debug,
{
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                self.ordering.0.insert(self.thread, previous);
            }
            None => {
                self.ordering.0.remove(&self.thread);
            }
        }
    }
}
