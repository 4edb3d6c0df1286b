//! Generation-tagged filter handles.
//!
//! Undo items and resources refer to filters through a [`FilterHandle`] rather than owning them.
//! A handle resolves only while its slot still holds the same generation, so a handle to a
//! finalized filter reads as gone even after the slot has been reused.

use crate::filter::FilterShared;
use crate::registry::Resource;
use crate::types::FilterKey;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle {
    index: usize,
    generation: u64,
}

struct Slot {
    generation: u64,
    filter: Option<Arc<FilterShared>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
    active: usize,
    next_key: FilterKey,
}

/// Live filters of one engine
#[derive(Default)]
pub struct FilterRegistry {
    inner: Mutex<Slots>,
    idle: Condvar,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot and key, build the filter state with them and store it.
    pub(crate) fn register_with<F>(&self, build: F) -> Arc<FilterShared>
    where
        F: FnOnce(FilterHandle, FilterKey) -> FilterShared,
    {
        let mut inner = self.inner.lock();
        inner.next_key += 1;
        let key = inner.next_key;
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot {
                    generation: 0,
                    filter: None,
                });
                inner.slots.len() - 1
            }
        };
        let slot = &mut inner.slots[index];
        slot.generation += 1;
        let handle = FilterHandle {
            index,
            generation: slot.generation,
        };
        let shared = Arc::new(build(handle, key));
        slot.filter = Some(Arc::clone(&shared));
        inner.active += 1;
        shared
    }

    pub fn resolve(&self, handle: FilterHandle) -> Option<Arc<FilterShared>> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.filter.clone()
    }

    /// Live filter holding lock key `key`
    pub fn find_by_key(&self, key: FilterKey) -> Option<Arc<FilterShared>> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter_map(|slot| slot.filter.as_ref())
            .find(|filter| filter.key() == key)
            .cloned()
    }

    /// Live filters holding a lock on `resource` or following its abort signal.
    pub fn referencing(&self, resource: &Resource) -> Vec<Arc<FilterShared>> {
        let mut filters: Vec<Arc<FilterShared>> = resource
            .lock_holders()
            .into_iter()
            .filter_map(|key| self.find_by_key(key))
            .collect();
        for handle in resource.abort_subscribers() {
            if filters.iter().any(|f| f.handle() == handle) {
                continue;
            }
            if let Some(filter) = self.resolve(handle) {
                filters.push(filter);
            }
        }
        filters
    }

    pub fn is_alive(&self, handle: FilterHandle) -> bool {
        self.resolve(handle).is_some()
    }

    pub(crate) fn remove(&self, handle: FilterHandle) {
        let mut inner = self.inner.lock();
        let removed = match inner.slots.get_mut(handle.index) {
            Some(slot) if slot.generation == handle.generation => slot.filter.take().is_some(),
            _ => false,
        };
        if removed {
            inner.free.push(handle.index);
            inner.active -= 1;
            if inner.active == 0 {
                self.idle.notify_all();
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    /// Block until every registered filter has been finalized.
    pub fn wait_until_idle(&self) {
        let mut inner = self.inner.lock();
        while inner.active > 0 {
            self.idle.wait(&mut inner);
        }
    }

    /// Returns `false` if filters were still active when the timeout elapsed.
    pub fn wait_until_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.active > 0 {
            if self.idle.wait_until(&mut inner, deadline).timed_out() {
                return inner.active == 0;
            }
        }
        true
    }
}
