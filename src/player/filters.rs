use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::protocol::{FilterKind, FilterValue, Filters};

/// The session's filter blocks plus a dirty bit.
///
/// Writes only mark the set dirty; [`crate::player::PlayerSession::commit_filters`]
/// pushes it to the node once per batch of changes.
#[derive(Default)]
pub struct FilterSet {
    filters: Mutex<Filters>,
    dirty: AtomicBool,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: FilterKind) -> Option<FilterValue> {
        self.filters.lock().get(kind)
    }

    pub fn set(&self, value: FilterValue) {
        self.filters.lock().set(value);
        self.dirty.store(true, Ordering::Release);
    }

    /// Removes one block. Clearing an absent block does not mark the set dirty.
    pub fn clear(&self, kind: FilterKind) -> bool {
        let removed = self.filters.lock().clear(kind);
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Replaces every block at once.
    pub fn replace(&self, filters: Filters) {
        let mut lock = self.filters.lock();
        if *lock != filters {
            *lock = filters;
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub fn snapshot(&self) -> Filters {
        self.filters.lock().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty bit, returning whether it was set. Exactly one of any
    /// number of concurrent callers sees `true`.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}
