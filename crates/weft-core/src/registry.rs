//! Weak identity registry.
//!
//! Maps ids to component states without keeping them alive: the only strong
//! ownership of a state is the tree itself (parent to child, up to an
//! attached root) plus any in-flight render queue entry. If the registry held
//! strong references, detached subtrees could never be reclaimed.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::collections::map::HashMap;

pub(crate) struct WeakRegistry<T> {
    entries: RefCell<HashMap<u64, Weak<T>>>,
    cull_threshold: Cell<usize>,
}

impl<T> WeakRegistry<T> {
    pub(crate) fn new(initial_threshold: usize) -> Self {
        Self {
            entries: RefCell::new(HashMap::default()),
            cull_threshold: Cell::new(initial_threshold.max(1)),
        }
    }

    /// Registers a handle. Once the entry count crosses the adaptive
    /// threshold, dead handles are culled to bound memory.
    pub(crate) fn insert(&self, id: u64, handle: Weak<T>) {
        self.entries.borrow_mut().insert(id, handle);
        if self.entries.borrow().len() > self.cull_threshold.get() {
            self.cull();
        }
    }

    /// Looks up a live entry. A dead handle is removed on the way out and
    /// reported as absent.
    pub(crate) fn get(&self, id: u64) -> Option<Rc<T>> {
        let mut entries = self.entries.borrow_mut();
        match entries.get(&id).map(Weak::upgrade) {
            Some(Some(live)) => Some(live),
            Some(None) => {
                entries.remove(&id);
                None
            }
            None => None,
        }
    }

    /// Drops every dead handle. If live occupancy still exceeds half the
    /// threshold afterwards, the threshold doubles so a mostly-live table is
    /// not rescanned on every insert.
    pub(crate) fn cull(&self) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, handle| handle.strong_count() > 0);
        let threshold = self.cull_threshold.get();
        if entries.len() > threshold / 2 {
            self.cull_threshold.set(threshold * 2);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn threshold(&self) -> usize {
        self.cull_threshold.get()
    }
}
