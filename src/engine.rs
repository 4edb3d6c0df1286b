//! Action engine.
//!
//! Owns the serialization thread and every piece of shared state commands touch. Submissions
//! are queued as jobs; each job runs the command lifecycle (`translate -> validate -> run ->
//! clear_cache`) and reports the outcome on the submission's context.

use crate::action::{
    Action, ActionContext, ActionContextHandle, ActionFactory, ActionHandle, ActionScope,
    ActionStatus, ChildContext,
};
use crate::config::EngineConfig;
use crate::dispatcher::{panic_message, Dispatcher, Job};
use crate::error::{ActionError, EngineError, ParseError};
use crate::events::{EngineEvent, EventBus};
use crate::filter::FilterRegistry;
use crate::history::ActionHistory;
use crate::provenance::{ProvenanceLog, ProvenanceStep};
use crate::registry::ResourceRegistry;
use crate::undo::{UndoBuffer, UndoItem};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Engine {
    config: EngineConfig,
    dispatcher: Dispatcher,
    registry: ResourceRegistry,
    filters: FilterRegistry,
    undo: UndoBuffer,
    provenance: ProvenanceLog,
    history: ActionHistory,
    events: Arc<EventBus>,
    factory: RwLock<ActionFactory>,
    sequence: AtomicU64,
}

impl Engine {
    /// Validate `config`, start the serialization thread and register the built-in commands.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        config.ensure_valid()?;
        let dispatcher = Dispatcher::start(&config.dispatcher)?;
        let events = Arc::new(EventBus::new());
        let mut factory = ActionFactory::new();
        crate::actions::register_builtins(&mut factory);

        info!(
            thread = %config.dispatcher.thread_name,
            undo_enabled = config.undo.enabled,
            "Action engine started"
        );
        Ok(Arc::new(Self {
            undo: UndoBuffer::new(&config.undo, Arc::clone(&events)),
            provenance: ProvenanceLog::new(config.provenance.resolved_user()),
            history: ActionHistory::new(config.history.max_entries),
            registry: ResourceRegistry::with_max_group_voxels(config.registry.max_group_voxels),
            filters: FilterRegistry::new(),
            factory: RwLock::new(factory),
            sequence: AtomicU64::new(0),
            dispatcher,
            events,
            config,
        }))
    }

    pub fn with_defaults() -> Result<Arc<Self>, EngineError> {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn undo_buffer(&self) -> &UndoBuffer {
        &self.undo
    }

    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    pub fn history(&self) -> &ActionHistory {
        &self.history
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Make a command kind available to [`create_action`](Self::create_action).
    pub fn register_action<A: Action + Default>(&self) {
        self.factory.write().register::<A>();
    }

    /// Build a command from its wire form.
    pub fn create_action(&self, line: &str) -> Result<ActionHandle, ParseError> {
        self.factory.read().create(line)
    }

    /// Usage line for `kind`, if registered.
    pub fn usage(&self, kind: &str) -> Option<String> {
        self.factory
            .read()
            .info_for(kind)
            .map(|info| info.usage().to_string())
    }

    pub fn command_kinds(&self) -> Vec<String> {
        self.factory.read().kinds()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue `action` and return immediately. The outcome is reported on `context`.
    pub fn post(
        self: &Arc<Self>,
        action: ActionHandle,
        context: ActionContextHandle,
    ) -> Result<(), EngineError> {
        let sequence = self.next_sequence();
        debug!(sequence, kind = %action.lock().kind(), "Command posted");
        let engine = Arc::clone(self);
        self.dispatcher.post_event(Box::new(move || {
            engine.run_action(sequence, &action, &context);
        }))
    }

    /// Queue `action` and block until its job has run.
    ///
    /// For an asynchronous command this returns once the worker is started; wait on the context
    /// for completion.
    ///
    /// # Panics
    ///
    /// Panics when called from the serialization thread.
    pub fn post_and_wait(
        self: &Arc<Self>,
        action: ActionHandle,
        context: ActionContextHandle,
    ) -> Result<(), EngineError> {
        let sequence = self.next_sequence();
        debug!(sequence, kind = %action.lock().kind(), "Command posted (waiting)");
        let engine = Arc::clone(self);
        self.dispatcher.post_and_wait_event(Box::new(move || {
            engine.run_action(sequence, &action, &context);
        }))
    }

    /// Queue a list of commands as one job. Each member runs under its own child context,
    /// returned in order; a failing member does not stop the ones after it. The parent context
    /// gets `Success` or the status of the first failing member, and is completed once all
    /// members have run. An asynchronous member counts as run once its worker has started: the
    /// next member and the parent's completion do not wait for that worker, and the parent's
    /// status does not reflect a later worker failure (the member's own context does).
    pub fn post_batch(
        self: &Arc<Self>,
        actions: Vec<ActionHandle>,
        context: ActionContextHandle,
    ) -> Result<Vec<ActionContextHandle>, EngineError> {
        let job = self.batch_job(actions, context);
        self.dispatcher.post_event(job.job)?;
        Ok(job.children)
    }

    /// Blocking form of [`post_batch`](Self::post_batch).
    pub fn post_and_wait_batch(
        self: &Arc<Self>,
        actions: Vec<ActionHandle>,
        context: ActionContextHandle,
    ) -> Result<Vec<ActionContextHandle>, EngineError> {
        let job = self.batch_job(actions, context);
        self.dispatcher.post_and_wait_event(job.job)?;
        Ok(job.children)
    }

    fn batch_job(
        self: &Arc<Self>,
        actions: Vec<ActionHandle>,
        context: ActionContextHandle,
    ) -> BatchJob {
        let children: Vec<ActionContextHandle> = actions
            .iter()
            .map(|_| Arc::new(ChildContext::new(Arc::clone(&context))) as ActionContextHandle)
            .collect();
        let sequences: Vec<u64> = actions.iter().map(|_| self.next_sequence()).collect();
        debug!(size = actions.len(), "Batch posted");

        let engine = Arc::clone(self);
        let members = children.clone();
        let job: Job = Box::new(move || {
            let mut first_failure = None;
            for ((action, child), sequence) in actions.iter().zip(&members).zip(sequences) {
                let status = engine.run_action(sequence, action, child);
                if status != ActionStatus::Success && first_failure.is_none() {
                    first_failure = Some(status);
                }
            }
            context.set_status(first_failure.unwrap_or(ActionStatus::Success));
            context.report_done();
        });
        BatchJob { job, children }
    }

    /// Parse `line` and queue the command. Returns the handle so callers can inspect it.
    pub fn post_command(
        self: &Arc<Self>,
        line: &str,
        context: ActionContextHandle,
    ) -> Result<ActionHandle, EngineError> {
        let action = self.create_action(line)?;
        self.post(Arc::clone(&action), context)?;
        Ok(action)
    }

    /// Blocking form of [`post_command`](Self::post_command).
    pub fn post_and_wait_command(
        self: &Arc<Self>,
        line: &str,
        context: ActionContextHandle,
    ) -> Result<ActionHandle, EngineError> {
        let action = self.create_action(line)?;
        self.post_and_wait(Arc::clone(&action), context)?;
        Ok(action)
    }

    /// Run `job` now when already on the serialization thread, otherwise queue it. If the queue
    /// is gone the job runs inline so cleanup is never lost.
    pub fn run_or_post(&self, job: Job) {
        if self.dispatcher.is_dispatch_thread() {
            job();
            return;
        }
        if let Err(job) = self.dispatcher.try_post(job) {
            warn!("Serialization thread unavailable; running job inline");
            job();
        }
    }

    /// Run `f` on the serialization thread and hand back its value.
    pub fn run_on_dispatch_thread<R, F>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.dispatcher.is_dispatch_thread() {
            return Ok(f());
        }
        let (tx, rx) = sync_channel(1);
        self.dispatcher.post_and_wait_event(Box::new(move || {
            let _ = tx.send(f());
        }))?;
        rx.recv()
            .map_err(|_| EngineError::Dispatcher("Job produced no value".to_string()))
    }

    /// Block until every job queued so far has run.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.dispatcher.post_and_wait_event(Box::new(|| {}))
    }

    /// Block until the queue is empty and no filter is alive.
    ///
    /// # Panics
    ///
    /// Panics when called from the serialization thread.
    pub fn wait_until_idle(&self) {
        if self.dispatcher.is_dispatch_thread() {
            panic!("wait_until_idle called from the serialization thread; this would deadlock");
        }
        loop {
            self.dispatcher.wait_idle();
            self.filters.wait_until_idle();
            if !self.dispatcher.is_busy() && self.filters.active_count() == 0 {
                break;
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.dispatcher.is_busy() || self.filters.active_count() > 0
    }

    /// Drain outstanding work and stop the serialization thread.
    pub fn shutdown(&self) {
        if !self.dispatcher.is_dispatch_thread() {
            self.wait_until_idle();
        }
        self.dispatcher.shutdown();
        info!("Action engine stopped");
    }

    /// Record the provenance step of an undoable command and push its undo item, with the
    /// executing command as redo target.
    pub fn record_undoable(
        &self,
        scope: &ActionScope<'_>,
        mut item: UndoItem,
        step: ProvenanceStep,
    ) {
        let step_id = self.provenance.record(step);
        item.add_provenance_step(step_id);
        item.set_redo_action(Arc::clone(scope.handle));
        self.undo.insert_undo_item(item, scope.source());
    }

    /// Execute one command on the serialization thread and return its immediate status. For
    /// asynchronous commands `Success` means the worker was started.
    fn run_action(
        self: &Arc<Self>,
        sequence: u64,
        handle: &ActionHandle,
        context: &ActionContextHandle,
    ) -> ActionStatus {
        let scope = ActionScope::new(self, context, handle);
        let mut action = handle.lock();

        let checked = catch_unwind(AssertUnwindSafe(|| {
            action
                .translate(&scope)
                .and_then(|_| action.validate(&scope))
        }))
        .unwrap_or_else(|panic| {
            Err(ActionError::Invalid(format!(
                "Validation panicked: {}",
                panic_message(panic.as_ref())
            )))
        });
        if let Err(err) = checked {
            let status = if matches!(err, ActionError::Unavailable(_))
                || context.status() == ActionStatus::Unavailable
            {
                ActionStatus::Unavailable
            } else {
                ActionStatus::Invalid
            };
            debug!(sequence, kind = %action.kind(), %status, error = %err, "Command rejected");
            context.set_status(status);
            context.report_error(&err.to_string());
            context.report_done();
            action.clear_cache();
            return status;
        }

        let kind = action.kind();
        let command = action.export_to_string();
        self.events.emit(EngineEvent::PreAction {
            sequence,
            kind: kind.clone(),
            command: command.clone(),
            source: context.source(),
        });

        let outcome = catch_unwind(AssertUnwindSafe(|| action.run(&scope))).unwrap_or_else(
            |panic| {
                Err(ActionError::Failed(format!(
                    "Command panicked: {}",
                    panic_message(panic.as_ref())
                )))
            },
        );
        let asynchronous = action.is_asynchronous();

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(sequence, kind = %kind, error = %err, "Command failed");
                context.set_status(ActionStatus::Error);
                context.report_error(&err.to_string());
                context.report_done();
                action.clear_cache();
                return ActionStatus::Error;
            }
        };

        if !asynchronous {
            if let Some(result) = &result {
                context.report_result(result.clone());
            }
            context.set_status(ActionStatus::Success);
            context.report_done();
        }
        action.clear_cache();
        drop(action);

        debug!(sequence, kind = %kind, asynchronous, "Command executed");
        self.events.emit(EngineEvent::PostAction {
            sequence,
            kind,
            command: command.clone(),
            result,
        });
        self.history.record(sequence, command, context.source());
        ActionStatus::Success
    }
}

struct BatchJob {
    job: Job,
    children: Vec<ActionContextHandle>,
}
