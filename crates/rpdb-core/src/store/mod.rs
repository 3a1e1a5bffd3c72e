// In-memory mirrors of the two server-side entity sets.

mod attributes;
mod entries;

pub use attributes::AttributeStore;
pub use entries::EntryStore;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// A panicking writer would otherwise poison the lock for every later
// reader; the guarded data is plain state that stays consistent.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
