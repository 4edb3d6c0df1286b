//! Provenance: the causal record of which command produced which resource state.
//!
//! Each undoable command records one [`ProvenanceStep`] next to its undo item. Undo deletes the
//! step again, so the log always mirrors the undo history.

use crate::types::{ProvenanceId, ProvenanceStepId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceStep {
    pub id: ProvenanceStepId,
    pub input_ids: Vec<ProvenanceId>,
    pub output_ids: Vec<ProvenanceId>,
    pub replaced_ids: Vec<ProvenanceId>,
    pub action_name: String,
    /// Parameters in wire format
    pub action_params: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
}

impl ProvenanceStep {
    /// Step for `action_name`; id, timestamp and user are assigned when it is recorded.
    pub fn new(action_name: &str, action_params: &str) -> Self {
        Self {
            id: -1,
            input_ids: Vec::new(),
            output_ids: Vec::new(),
            replaced_ids: Vec::new(),
            action_name: action_name.to_string(),
            action_params: action_params.to_string(),
            timestamp: Utc::now(),
            user: String::new(),
        }
    }

    pub fn with_inputs(mut self, ids: impl IntoIterator<Item = ProvenanceId>) -> Self {
        self.input_ids.extend(ids);
        self
    }

    pub fn with_outputs(mut self, ids: impl IntoIterator<Item = ProvenanceId>) -> Self {
        self.output_ids.extend(ids);
        self
    }

    pub fn with_replaced(mut self, ids: impl IntoIterator<Item = ProvenanceId>) -> Self {
        self.replaced_ids.extend(ids);
        self
    }
}

struct LogInner {
    steps: BTreeMap<ProvenanceStepId, ProvenanceStep>,
    next_id: ProvenanceStepId,
}

pub struct ProvenanceLog {
    inner: Mutex<LogInner>,
    user: String,
}

impl ProvenanceLog {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                steps: BTreeMap::new(),
                next_id: 0,
            }),
            user: user.into(),
        }
    }

    pub fn record(&self, mut step: ProvenanceStep) -> ProvenanceStepId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        step.id = id;
        step.timestamp = Utc::now();
        step.user = self.user.clone();
        inner.steps.insert(id, step);
        id
    }

    pub fn delete(&self, id: ProvenanceStepId) -> Option<ProvenanceStep> {
        self.inner.lock().steps.remove(&id)
    }

    pub fn get(&self, id: ProvenanceStepId) -> Option<ProvenanceStep> {
        self.inner.lock().steps.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All steps, oldest first.
    pub fn steps(&self) -> Vec<ProvenanceStep> {
        self.inner.lock().steps.values().cloned().collect()
    }

    /// Steps that led to `id`, oldest first.
    pub fn trail(&self, id: ProvenanceId) -> Vec<ProvenanceStep> {
        let inner = self.inner.lock();
        let mut pending = vec![id];
        let mut seen_ids = BTreeSet::new();
        let mut found = BTreeSet::new();
        while let Some(current) = pending.pop() {
            if !seen_ids.insert(current) {
                continue;
            }
            for step in inner.steps.values() {
                if step.output_ids.contains(&current) && found.insert(step.id) {
                    pending.extend(step.input_ids.iter().copied());
                }
            }
        }
        found
            .into_iter()
            .filter_map(|step_id| inner.steps.get(&step_id).cloned())
            .collect()
    }
}
