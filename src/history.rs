//! Bounded history of executed commands, fed by the post-execution signal.

use crate::action::ActionSource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub command: String,
    pub source: ActionSource,
    pub timestamp: DateTime<Utc>,
}

pub struct ActionHistory {
    entries: Mutex<VecDeque<HistoryEntry>>,
    max_entries: usize,
}

impl ActionHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn record(&self, sequence: u64, command: String, source: ActionSource) {
        let mut entries = self.entries.lock();
        if entries.len() == self.max_entries {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry {
            sequence,
            command,
            source,
            timestamp: Utc::now(),
        });
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.command.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
