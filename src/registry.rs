use std::{fmt::Debug, hash::Hash, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::ReentrantMutex;

pub(crate) type RecordLock = ReentrantMutex<()>;

#[derive(Debug)]
struct Slot {
    lock: Arc<RecordLock>,
    /// Threads holding or waiting on `lock`. Only touched under the shard lock.
    users: usize,
}

/// Map from entity id to its lock record.
///
/// Records are created on the first lease for an id and removed when the last
/// lease is dropped. Both happen under the same shard lock, so a second record
/// can never be installed for an id that still has users.
#[derive(Debug)]
pub(crate) struct Registry<K>(DashMap<K, Slot>)
where
    K: Hash + Eq;

impl<K> Registry<K>
where
    K: Hash + Eq + Clone + Debug,
{
    pub fn new() -> Self {
        Self(DashMap::new())
    }

    pub fn lease(&self, id: K) -> Lease<'_, K> {
        let lock = {
            let mut slot = self.0.entry(id.clone()).or_insert_with(|| Slot {
                lock: Arc::new(ReentrantMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            slot.lock.clone()
        };
        Lease {
            registry: self,
            id: Some(id),
            lock,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn release(&self, id: K) {
        match self.0.entry(id) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.users -= 1;
                if slot.users == 0 {
                    tracing::debug!(id = ?entry.key(), "Reclaimed lock record");
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                tracing::error!(id = ?entry.key(), "Released a lease with no lock record");
                debug_assert!(false, "lease outlived its lock record");
            }
        }
    }
}

/// A registered interest in one lock record. Keeps the record alive until dropped.
#[derive(Debug)]
pub(crate) struct Lease<'a, K>
where
    K: Hash + Eq + Clone + Debug,
{
    registry: &'a Registry<K>,
    id: Option<K>,
    lock: Arc<RecordLock>,
}

impl<K> Lease<'_, K>
where
    K: Hash + Eq + Clone + Debug,
{
    pub fn lock(&self) -> &RecordLock {
        &self.lock
    }
}

impl<K> Drop for Lease<'_, K>
where
    K: Hash + Eq + Clone + Debug,
{
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.release(id);
        }
    }
}
