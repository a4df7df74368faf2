//! Row-level style locking for application entities.
//!
//! [`EntityLocker`] hands out exclusive access per entity id for the duration of
//! a closure. It never sees the entities themselves, only their ids.

mod error;
mod locker;
mod ordering;
mod registry;

pub use crate::{
    error::{LockError, LockResult},
    locker::EntityLocker,
};
