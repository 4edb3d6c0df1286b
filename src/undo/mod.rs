//! Undo buffer.
//!
//! Newest undo item first. Undoing an item moves it to the redo list; redoing pops it again and
//! re-runs its command under an undo-buffer context, which inserts a fresh undo item without
//! clearing the remaining redo list. Any other inserted item clears the redo list.
//!
//! Items are evicted oldest first once the buffer holds more than `max_items` items or more
//! checkpoint bytes than `memory_budget_bytes` (the newest item is always kept).

pub mod item;

pub use item::UndoItem;

use crate::action::{ActionContextHandle, ActionSource};
use crate::config::UndoConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct UndoInner {
    undo: VecDeque<UndoItem>,
    redo: Vec<UndoItem>,
    enabled: bool,
}

pub struct UndoBuffer {
    inner: Mutex<UndoInner>,
    max_items: usize,
    memory_budget: u64,
    events: Arc<EventBus>,
}

impl UndoBuffer {
    pub fn new(config: &UndoConfig, events: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(UndoInner {
                undo: VecDeque::new(),
                redo: Vec::new(),
                enabled: config.enabled,
            }),
            max_items: config.max_items.max(1),
            memory_budget: config.memory_budget_bytes,
            events,
        }
    }

    pub fn insert_undo_item(&self, item: UndoItem, source: ActionSource) {
        {
            let mut inner = self.inner.lock();
            if !inner.enabled {
                debug!(tag = %item.tag(), "Undo buffer disabled; dropping item");
                return;
            }
            if source != ActionSource::UndoBuffer {
                inner.redo.clear();
            }
            debug!(tag = %item.tag(), size = item.compute_size(), "Undo item recorded");
            inner.undo.push_front(item);

            let mut total: u64 = inner.undo.iter().map(|i| i.compute_size() as u64).sum();
            while inner.undo.len() > 1
                && (inner.undo.len() > self.max_items || total > self.memory_budget)
            {
                if let Some(evicted) = inner.undo.pop_back() {
                    total -= evicted.compute_size() as u64;
                    debug!(tag = %evicted.tag(), "Evicted oldest undo item");
                }
            }
        }
        self.notify_changed();
    }

    /// Undo the newest item. On failure the item stays at the front for another attempt.
    pub fn undo(&self, engine: &Arc<Engine>) -> Result<(), EngineError> {
        let mut item = self
            .inner
            .lock()
            .undo
            .pop_front()
            .ok_or_else(|| EngineError::Undo("Nothing to undo".to_string()))?;

        let outcome = item.apply_and_clear_undo(engine);
        {
            let mut inner = self.inner.lock();
            match &outcome {
                Ok(()) => {
                    if item.redo_action().is_some() {
                        inner.redo.push(item);
                    }
                }
                Err(e) => {
                    warn!(tag = %item.tag(), error = %e, "Undo failed; item kept");
                    inner.undo.push_front(item);
                }
            }
        }
        self.notify_changed();
        outcome
    }

    /// Redo the most recently undone item. On failure the item stays on the redo list.
    pub fn redo(
        &self,
        engine: &Arc<Engine>,
        parent: &ActionContextHandle,
    ) -> Result<ActionContextHandle, EngineError> {
        let item = self
            .inner
            .lock()
            .redo
            .pop()
            .ok_or_else(|| EngineError::Undo("Nothing to redo".to_string()))?;

        match item.apply_redo(engine, parent) {
            Ok(context) => {
                self.notify_changed();
                Ok(context)
            }
            Err(e) => {
                warn!(tag = %item.tag(), error = %e, "Redo failed; item kept");
                self.inner.lock().redo.push(item);
                self.notify_changed();
                Err(EngineError::Undo(format!("Redo failed: {}", e)))
            }
        }
    }

    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.undo.clear();
            inner.redo.clear();
        }
        info!("Undo buffer reset");
        self.notify_changed();
    }

    /// Disabling the buffer also clears it.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn has_undo(&self) -> bool {
        !self.inner.lock().undo.is_empty()
    }

    pub fn has_redo(&self) -> bool {
        !self.inner.lock().redo.is_empty()
    }

    pub fn num_undo_items(&self) -> usize {
        self.inner.lock().undo.len()
    }

    pub fn num_redo_items(&self) -> usize {
        self.inner.lock().redo.len()
    }

    /// Tag of the undo item at `index` (0 is the next to undo).
    pub fn undo_tag(&self, index: usize) -> Option<String> {
        self.inner
            .lock()
            .undo
            .get(index)
            .map(|i| i.tag().to_string())
    }

    /// Tag of the redo item at `index` (0 is the next to redo).
    pub fn redo_tag(&self, index: usize) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .redo
            .len()
            .checked_sub(index + 1)
            .and_then(|i| inner.redo.get(i))
            .map(|i| i.tag().to_string())
    }

    /// Checkpoint and deleted-resource bytes held by the undo list
    pub fn total_byte_size(&self) -> usize {
        self.inner
            .lock()
            .undo
            .iter()
            .map(UndoItem::compute_size)
            .sum()
    }

    fn notify_changed(&self) {
        let (undo_tag, redo_tag) = (self.undo_tag(0), self.redo_tag(0));
        self.events
            .emit(EngineEvent::UndoBufferChanged { undo_tag, redo_tag });
    }
}
