//! In-process event bus for engine observers.
//!
//! Observers subscribe and receive every [`EngineEvent`] emitted after their subscription on a
//! plain `mpsc` channel. Disconnected subscribers are dropped on the next emit.

use crate::action::{ActionResult, ActionSource};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::mpsc::{channel, Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Emitted on the serialization thread after validation, before `run`
    PreAction {
        sequence: u64,
        kind: String,
        command: String,
        source: ActionSource,
    },
    /// Emitted after a successful `run`
    PostAction {
        sequence: u64,
        kind: String,
        command: String,
        result: Option<ActionResult>,
    },
    UndoBufferChanged {
        undo_tag: Option<String>,
        redo_tag: Option<String>,
    },
    ProgressStarted {
        message: String,
    },
    ProgressFinished {
        message: String,
    },
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (sender, receiver) = channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub fn emit(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
