//! Undo items and the rollback protocol.

use crate::action::{ActionContextHandle, ActionHandle, ActionResult, ActionScope, ActionStatus};
use crate::engine::Engine;
use crate::error::{ActionError, EngineError};
use crate::events::EngineEvent;
use crate::filter::FilterHandle;
use crate::registry::{Checkpoint, CounterState, Resource};
use crate::types::{ProvenanceStepId, ResourceId};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything needed to reverse one undoable command, plus the command itself for redo.
pub struct UndoItem {
    tag: String,
    filters_to_abort: Vec<FilterHandle>,
    resources_to_delete: Vec<Arc<Resource>>,
    /// Deleted resources with their former position inside their group, in deletion order
    resources_to_add: Vec<(Arc<Resource>, Option<usize>)>,
    resources_to_restore: Vec<(Arc<Resource>, Checkpoint)>,
    redo_action: Option<ActionHandle>,
    counters: CounterState,
    provenance_steps: Vec<ProvenanceStepId>,
    counters_restored: bool,
    /// Active resource before the command, when the command may change it
    active: Option<Option<ResourceId>>,
}

impl UndoItem {
    /// `counters` must be captured before the command allocates any id.
    pub fn new(tag: &str, counters: CounterState) -> Self {
        Self {
            tag: tag.to_string(),
            filters_to_abort: Vec::new(),
            resources_to_delete: Vec::new(),
            resources_to_add: Vec::new(),
            resources_to_restore: Vec::new(),
            redo_action: None,
            counters,
            provenance_steps: Vec::new(),
            counters_restored: false,
            active: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn counters(&self) -> CounterState {
        self.counters
    }

    pub fn add_filter_to_abort(&mut self, filter: FilterHandle) {
        self.filters_to_abort.push(filter);
    }

    pub fn add_resource_to_delete(&mut self, resource: Arc<Resource>) {
        self.resources_to_delete.push(resource);
    }

    /// Record a resource the command deletes, with its position before deletion.
    pub fn add_resource_to_add(&mut self, resource: Arc<Resource>, position: Option<usize>) {
        self.resources_to_add.push((resource, position));
    }

    pub fn add_resource_to_restore(&mut self, resource: Arc<Resource>, checkpoint: Checkpoint) {
        self.resources_to_restore.push((resource, checkpoint));
    }

    /// Record the active resource to reinstate on undo.
    pub fn set_active_to_restore(&mut self, active: Option<ResourceId>) {
        self.active = Some(active);
    }

    pub fn add_provenance_step(&mut self, step: ProvenanceStepId) {
        self.provenance_steps.push(step);
    }

    pub fn set_redo_action(&mut self, action: ActionHandle) {
        self.redo_action = Some(action);
    }

    pub fn redo_action(&self) -> Option<&ActionHandle> {
        self.redo_action.as_ref()
    }

    pub fn filters_to_abort(&self) -> &[FilterHandle] {
        &self.filters_to_abort
    }

    pub fn resources_to_delete(&self) -> Vec<String> {
        self.resources_to_delete
            .iter()
            .map(|r| r.id().to_string())
            .collect()
    }

    pub fn resources_to_add(&self) -> Vec<String> {
        self.resources_to_add
            .iter()
            .map(|(r, _)| r.id().to_string())
            .collect()
    }

    pub fn resources_to_restore(&self) -> Vec<String> {
        self.resources_to_restore
            .iter()
            .map(|(r, _)| r.id().to_string())
            .collect()
    }

    pub fn provenance_steps(&self) -> &[ProvenanceStepId] {
        &self.provenance_steps
    }

    /// Bytes held by checkpoints and deleted resources.
    pub fn compute_size(&self) -> usize {
        let checkpoints: usize = self
            .resources_to_restore
            .iter()
            .map(|(_, checkpoint)| checkpoint.byte_size())
            .sum();
        let added: usize = self
            .resources_to_add
            .iter()
            .map(|(resource, _)| resource.byte_size())
            .sum();
        checkpoints + added
    }

    /// Reverse the command. The phases run strictly in order:
    ///
    /// 1. abort in-flight filters and wait for their workers to terminate;
    /// 2. restore checkpoints;
    /// 3. delete resources the command created;
    /// 4. re-insert resources the command deleted, first aborting and waiting for any filter
    ///    still locking or following them;
    /// 5. roll back the registry counters and the active resource.
    ///
    /// Each phase drains its list, so after a failure a retry resumes where it stopped. On
    /// success the command's provenance steps are deleted. Must run on the serialization thread.
    pub fn apply_and_clear_undo(&mut self, engine: &Arc<Engine>) -> Result<(), EngineError> {
        info!(tag = %self.tag, "Undoing command");

        // Phase 1
        let live: Vec<_> = self
            .filters_to_abort
            .drain(..)
            .filter_map(|handle| engine.filters().resolve(handle))
            .collect();
        if !live.is_empty() {
            let message = format!("Waiting for {} filter(s) to stop", live.len());
            engine.events().emit(EngineEvent::ProgressStarted {
                message: message.clone(),
            });
            for filter in live {
                filter.abort_and_wait(engine);
            }
            engine
                .events()
                .emit(EngineEvent::ProgressFinished { message });
        }

        // Phase 2
        for (resource, checkpoint) in self.resources_to_restore.drain(..) {
            debug!(resource = %resource.id(), "Restoring checkpoint");
            checkpoint.apply(&resource);
        }

        // Phase 3
        for resource in self.resources_to_delete.drain(..) {
            engine.registry().delete(&resource);
        }

        // Phase 4
        if !self.resources_to_add.is_empty() {
            let message = format!("Restoring {} deleted resource(s)", self.resources_to_add.len());
            engine.events().emit(EngineEvent::ProgressStarted {
                message: message.clone(),
            });
            while let Some((resource, position)) = self.resources_to_add.pop() {
                for filter in engine.filters().referencing(&resource) {
                    debug!(resource = %resource.id(), filter = %filter.name(), "Stopping filter before restoring resource");
                    filter.abort_and_wait(engine);
                }
                if let Err(e) = engine
                    .registry()
                    .insert_at(Arc::clone(&resource), position)
                {
                    self.resources_to_add.push((resource, position));
                    engine
                        .events()
                        .emit(EngineEvent::ProgressFinished { message });
                    return Err(EngineError::Undo(format!(
                        "Could not restore resource: {}",
                        e
                    )));
                }
            }
            engine
                .events()
                .emit(EngineEvent::ProgressFinished { message });
        }

        // Phase 5
        if !self.counters_restored {
            engine.registry().set_counter_state(self.counters);
            self.counters_restored = true;
        }
        if let Some(active) = self.active.take() {
            let registry = engine.registry();
            let active = active.filter(|id| registry.contains(id));
            if let Err(e) = registry.set_active_resource(active.as_deref()) {
                debug!(error = %e, "Active resource not restored");
            }
        }

        for step in self.provenance_steps.drain(..) {
            engine.provenance().delete(step);
        }
        Ok(())
    }

    /// Clear the redo command's cache, validate it and run it again under an undo-buffer context.
    /// Returns the replay context on success.
    pub fn apply_redo(
        &self,
        engine: &Arc<Engine>,
        parent: &ActionContextHandle,
    ) -> Result<ActionContextHandle, ActionError> {
        let handle = self
            .redo_action
            .as_ref()
            .ok_or_else(|| ActionError::Invalid(format!("'{}' cannot be redone", self.tag)))?;
        let context = crate::action::undo_context(parent);
        let scope = ActionScope::new(engine, &context, handle);
        let mut action = handle.lock();
        info!(tag = %self.tag, "Redoing command");

        action.clear_cache();
        let outcome = action
            .validate(&scope)
            .and_then(|_| action.run(&scope));
        let asynchronous = action.is_asynchronous();
        action.clear_cache();

        let result: Option<ActionResult> = outcome?;
        if !asynchronous {
            if let Some(result) = result {
                context.report_result(result);
            }
            context.set_status(ActionStatus::Success);
            context.report_done();
        }
        Ok(context)
    }
}

impl std::fmt::Debug for UndoItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoItem")
            .field("tag", &self.tag)
            .field("filters_to_abort", &self.filters_to_abort)
            .field("resources_to_delete", &self.resources_to_delete())
            .field("resources_to_add", &self.resources_to_add())
            .field("resources_to_restore", &self.resources_to_restore())
            .field("counters", &self.counters)
            .field("active", &self.active)
            .field("provenance_steps", &self.provenance_steps)
            .finish()
    }
}
