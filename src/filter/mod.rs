//! Resource-locking base for background filters.
//!
//! A command whose effect is computed off the serialization thread builds a
//! [`ResourceLockingFilter`] in `run`, locks or creates the resources it needs, records its undo
//! item and then [`start`](ResourceLockingFilter::start)s the worker. The filter tracks every
//! resource it locked or created; finalization releases them on every exit path:
//!
//! * locked resources are unlocked;
//! * created resources are deleted if the filter was aborted, failed, or never produced data,
//!   and unlocked (made usable) otherwise.
//!
//! Finalization always runs on the serialization thread and happens exactly once, either as a
//! job queued behind the worker's marshalled results or inline when undo aborts the filter.
//!
//! Cancellation is cooperative. The worker must poll [`ResourceLockingFilter::check_abort`] at a
//! bounded granularity (the built-in filters poll once per z slice); a worker that never polls
//! stalls an undo indefinitely.

pub mod handle;

pub use handle::{FilterHandle, FilterRegistry};

use crate::action::{ActionContextHandle, ActionResult, ActionStatus};
use crate::dispatcher::panic_message;
use crate::engine::Engine;
use crate::error::ActionError;
use crate::registry::{Checkpoint, CounterState, Resource, ResourceKind};
use crate::types::{FilterKey, ProvenanceId, ResourceId};
use crate::undo::UndoItem;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct FilterControl {
    abort: bool,
    done: bool,
    failed: bool,
    started: bool,
    finalized: bool,
    /// Resource whose computed data could not be installed
    discarded: Option<ResourceId>,
}

#[derive(Default)]
struct Tracked {
    locked: Vec<Arc<Resource>>,
    created: Vec<Arc<Resource>>,
    subscribed: Vec<Arc<Resource>>,
}

/// Filter state shared between the worker, the serialization thread and undo items.
pub struct FilterShared {
    name: String,
    handle: FilterHandle,
    key: FilterKey,
    control: Mutex<FilterControl>,
    done_cond: Condvar,
    tracked: Mutex<Tracked>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FilterShared {
    pub(crate) fn new(name: &str, handle: FilterHandle, key: FilterKey) -> Self {
        Self {
            name: name.to_string(),
            handle,
            key,
            control: Mutex::new(FilterControl::default()),
            done_cond: Condvar::new(),
            tracked: Mutex::new(Tracked::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> FilterHandle {
        self.handle
    }

    pub fn key(&self) -> FilterKey {
        self.key
    }

    pub fn raise_abort(&self) {
        self.control.lock().abort = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.control.lock().abort
    }

    pub fn is_done(&self) -> bool {
        self.control.lock().done
    }

    pub fn is_finalized(&self) -> bool {
        self.control.lock().finalized
    }

    fn mark_done(&self, failed: bool) {
        let mut control = self.control.lock();
        control.failed |= failed;
        control.done = true;
        self.done_cond.notify_all();
    }

    /// Block until the worker has returned from its algorithm. Returns at once for a filter that
    /// was never started.
    pub fn wait_done(&self) {
        let mut control = self.control.lock();
        while control.started && !control.done {
            self.done_cond.wait(&mut control);
        }
    }

    /// Raise the abort flag, wait for the worker thread to terminate and finalize the filter.
    pub fn abort_and_wait(self: &Arc<Self>, engine: &Arc<Engine>) {
        debug!(filter = %self.name, "Aborting filter and waiting for its worker");
        self.raise_abort();
        self.wait_done();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!(filter = %self.name, "Filter worker terminated abnormally");
            }
        }
        let shared = Arc::clone(self);
        let job_engine = Arc::clone(engine);
        engine.run_or_post(Box::new(move || shared.finalize(&job_engine)));
    }

    /// Release everything the filter still tracks. Runs once; later calls are no-ops.
    pub(crate) fn finalize(&self, engine: &Engine) {
        let discard = {
            let mut control = self.control.lock();
            if control.finalized {
                return;
            }
            control.finalized = true;
            control.abort || control.failed
        };

        let tracked = std::mem::take(&mut *self.tracked.lock());
        let registry = engine.registry();
        for resource in tracked.subscribed {
            resource.unsubscribe_abort(self.handle);
        }
        for resource in tracked.locked {
            if let Err(e) = registry.unlock(&resource, self.key) {
                debug!(filter = %self.name, resource = %resource.id(), error = %e, "Unlock skipped");
            }
        }
        for resource in tracked.created {
            if discard || !resource.has_valid_data() {
                match registry.delete_locked(&resource, self.key) {
                    Ok(_) => debug!(
                        filter = %self.name,
                        resource = %resource.id(),
                        "Deleted resource created by filter"
                    ),
                    Err(e) => debug!(
                        filter = %self.name,
                        resource = %resource.id(),
                        error = %e,
                        "Delete skipped"
                    ),
                }
            } else if let Err(e) = registry.unlock(&resource, self.key) {
                debug!(filter = %self.name, resource = %resource.id(), error = %e, "Unlock skipped");
            }
        }
        engine.filters().remove(self.handle);
    }

    fn track_locked(&self, resource: &Arc<Resource>) {
        self.tracked.lock().locked.push(Arc::clone(resource));
    }

    fn track_created(&self, resource: &Arc<Resource>) {
        self.tracked.lock().created.push(Arc::clone(resource));
    }

    fn track_subscribed(&self, resource: &Arc<Resource>) {
        self.tracked.lock().subscribed.push(Arc::clone(resource));
    }

    fn mark_discarded(&self, resource: &Resource) {
        let mut control = self.control.lock();
        control.failed = true;
        control.discarded.get_or_insert_with(|| resource.id().to_string());
    }

    /// Resource whose result was dropped because it could no longer be installed
    pub fn discarded_result(&self) -> Option<ResourceId> {
        self.control.lock().discarded.clone()
    }

    fn created(&self) -> Vec<Arc<Resource>> {
        self.tracked.lock().created.clone()
    }

    /// Stop tracking `resource`; returns whether it was still tracked.
    fn untrack(&self, resource: &Arc<Resource>) -> bool {
        let mut guard = self.tracked.lock();
        let tracked = &mut *guard;
        for list in [&mut tracked.locked, &mut tracked.created] {
            if let Some(index) = list.iter().position(|r| Arc::ptr_eq(r, resource)) {
                list.remove(index);
                return true;
            }
        }
        false
    }
}

/// Worker-side view of a filter. Owned by the command during `run` and by the worker thread
/// after [`start`](Self::start).
pub struct ResourceLockingFilter {
    engine: Arc<Engine>,
    shared: Arc<FilterShared>,
    counters: CounterState,
    active: Option<ResourceId>,
    checkpoints: Vec<(Arc<Resource>, Checkpoint)>,
    replacements: Vec<(ProvenanceId, ProvenanceId)>,
}

impl ResourceLockingFilter {
    /// Register a filter. The registry counters are captured now, before the command allocates
    /// any id, so undo can roll them back.
    pub fn new(engine: &Arc<Engine>, name: &str) -> Self {
        let shared = engine
            .filters()
            .register_with(|handle, key| FilterShared::new(name, handle, key));
        Self {
            engine: Arc::clone(engine),
            shared,
            counters: engine.registry().counter_state(),
            active: engine.registry().active_resource(),
            checkpoints: Vec::new(),
            replacements: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn handle(&self) -> FilterHandle {
        self.shared.handle()
    }

    pub fn key(&self) -> FilterKey {
        self.shared.key()
    }

    pub fn shared(&self) -> &Arc<FilterShared> {
        &self.shared
    }

    pub fn counters(&self) -> CounterState {
        self.counters
    }

    /// `(old, new)` provenance ids of resources locked for in-place processing.
    pub fn replacements(&self) -> &[(ProvenanceId, ProvenanceId)] {
        &self.replacements
    }

    pub fn find_resource(&self, id: &str) -> Result<Arc<Resource>, ActionError> {
        Ok(self.engine.registry().find(id)?)
    }

    /// Shared lock, released at finalization.
    pub fn lock_for_use(&self, resource: &Arc<Resource>) -> Result<(), ActionError> {
        self.engine.registry().lock_for_use(resource, self.key())?;
        self.shared.track_locked(resource);
        Ok(())
    }

    /// Exclusive lock, released at finalization. With `checkpoint`, the current data is captured
    /// for undo and the resource gets a fresh provenance id; this form must be called on the
    /// serialization thread.
    pub fn lock_for_processing(
        &mut self,
        resource: &Arc<Resource>,
        checkpoint: bool,
    ) -> Result<(), ActionError> {
        if checkpoint && !self.engine.dispatcher().is_dispatch_thread() {
            return Err(ActionError::Failed(
                "Checkpointed locks must be taken on the serialization thread".to_string(),
            ));
        }
        self.engine
            .registry()
            .lock_for_processing(resource, self.key())?;
        self.shared.track_locked(resource);
        if checkpoint {
            self.checkpoints
                .push((Arc::clone(resource), Checkpoint::capture(resource)));
            let replaced = self.engine.registry().assign_provenance(resource);
            self.replacements.push(replaced);
        }
        Ok(())
    }

    /// Create a resource in `from`'s group in state `Creating`, locked by this filter. Must be
    /// called on the serialization thread.
    pub fn create_and_lock_new(
        &self,
        from: &Resource,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Arc<Resource>, ActionError> {
        if !self.engine.dispatcher().is_dispatch_thread() {
            return Err(ActionError::Failed(
                "Resources can only be created on the serialization thread".to_string(),
            ));
        }
        let resource = self
            .engine
            .registry()
            .create_and_lock(from.group(), kind, name, self.key())?;
        self.shared.track_created(&resource);
        Ok(resource)
    }

    /// Follow `resource`'s abort signal until finalization.
    pub fn connect_abort(&self, resource: &Arc<Resource>) {
        resource.subscribe_abort(self.handle());
        self.shared.track_subscribed(resource);
    }

    pub fn check_abort(&self) -> bool {
        self.shared.is_aborted()
    }

    pub fn raise_abort(&self) {
        self.shared.raise_abort();
    }

    /// Undo item pre-filled with this filter, its created resources, its checkpoints, and the
    /// counters and active resource captured at construction.
    pub fn create_undo_item(&mut self, tag: &str) -> UndoItem {
        let mut item = UndoItem::new(tag, self.counters);
        item.set_active_to_restore(self.active.clone());
        item.add_filter_to_abort(self.handle());
        for resource in self.shared.created() {
            item.add_resource_to_delete(resource);
        }
        for (resource, checkpoint) in self.checkpoints.drain(..) {
            item.add_resource_to_restore(resource, checkpoint);
        }
        item
    }

    /// Marshal computed data onto the serialization thread for installation. Results of an
    /// aborted filter are dropped. A result that cannot be installed because the resource was
    /// unregistered or is no longer locked by this filter fails the filter.
    pub fn dispatch_insert_result(
        &self,
        resource: &Arc<Resource>,
        data: Vec<u8>,
    ) -> Result<(), ActionError> {
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        let resource = Arc::clone(resource);
        self.post(Box::new(move || {
            if shared.is_aborted() || shared.is_finalized() {
                warn!(filter = %shared.name(), resource = %resource.id(), "Discarding result of aborted filter");
                return;
            }
            if let Err(e) = engine.registry().install_data(&resource, data, shared.key()) {
                warn!(filter = %shared.name(), resource = %resource.id(), error = %e, "Discarding stale filter result");
                shared.mark_discarded(&resource);
            }
        }))
    }

    /// Release one tracked resource early.
    pub fn dispatch_unlock_resource(&self, resource: &Arc<Resource>) -> Result<(), ActionError> {
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        let resource = Arc::clone(resource);
        self.post(Box::new(move || {
            if shared.untrack(&resource) {
                if let Err(e) = engine.registry().unlock(&resource, shared.key()) {
                    warn!(resource = %resource.id(), error = %e, "Unlock failed");
                }
            }
        }))
    }

    /// Delete one tracked resource once the worker is done with it. Ignored after an abort; the
    /// lock is then released by finalization.
    pub fn dispatch_delete_resource(&self, resource: &Arc<Resource>) -> Result<(), ActionError> {
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        let resource = Arc::clone(resource);
        self.post(Box::new(move || {
            if shared.is_aborted() {
                return;
            }
            if shared.untrack(&resource) {
                if let Err(e) = engine.registry().delete_locked(&resource, shared.key()) {
                    warn!(resource = %resource.id(), error = %e, "Delete failed");
                }
            }
        }))
    }

    fn post(&self, job: crate::dispatcher::Job) -> Result<(), ActionError> {
        self.engine
            .dispatcher()
            .post_event(job)
            .map_err(|e| ActionError::Failed(e.to_string()))
    }

    /// Spawn the worker thread running `algorithm`. The context is completed on the
    /// serialization thread after the worker's results have been installed and its resources
    /// released.
    pub fn start<F>(self, context: ActionContextHandle, algorithm: F) -> Result<FilterHandle, ActionError>
    where
        F: FnOnce(&mut ResourceLockingFilter) -> Result<Option<ActionResult>, ActionError>
            + Send
            + 'static,
    {
        let handle = self.handle();
        let shared = Arc::clone(&self.shared);
        let thread_name = format!(
            "{}-{}",
            self.engine.config().dispatcher.worker_thread_prefix,
            shared.name()
        );
        shared.control.lock().started = true;

        let spawned = thread::Builder::new().name(thread_name).spawn(move || {
            let mut filter = self;
            let outcome = catch_unwind(AssertUnwindSafe(|| algorithm(&mut filter)));
            filter.complete(outcome, context);
        });

        match spawned {
            Ok(worker) => {
                *shared.worker.lock() = Some(worker);
                debug!(filter = %shared.name(), "Filter worker started");
                Ok(handle)
            }
            Err(e) => Err(ActionError::Failed(format!(
                "Failed to spawn filter worker: {}",
                e
            ))),
        }
    }

    fn complete(
        &self,
        outcome: std::thread::Result<Result<Option<ActionResult>, ActionError>>,
        context: ActionContextHandle,
    ) {
        let name = self.name().to_string();
        let (result, mut failure) = match outcome {
            Ok(Ok(result)) => (result, None),
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(filter = %name, panic = %message, "Filter worker panicked");
                (None, Some(format!("Filter '{}' panicked: {}", name, message)))
            }
        };
        if self.check_abort() {
            failure = Some(format!("Filter '{}' was aborted", name));
        } else if let Some(message) = &failure {
            error!(filter = %name, error = %message, "Filter failed");
        }

        if failure.is_some() {
            self.shared.control.lock().failed = true;
        }
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        self.engine
            .run_or_post(Box::new(move || shared.finalize(&engine)));
        self.shared.mark_done(failure.is_some());

        let discarded_by = Arc::clone(&self.shared);
        self.engine.run_or_post(Box::new(move || {
            // Undo may abort the filter after its worker returned.
            if failure.is_none() && discarded_by.is_aborted() {
                failure = Some(format!("Filter '{}' was aborted", name));
            }
            if failure.is_none() {
                failure = discarded_by.discarded_result().map(|id| {
                    error!(filter = %name, resource = %id, "Filter result was discarded");
                    format!("Filter '{}' could not install its result into '{}'", name, id)
                });
            }
            match failure {
                Some(message) => {
                    context.set_status(ActionStatus::Error);
                    context.report_error(&message);
                }
                None => {
                    if let Some(result) = result {
                        context.report_result(result);
                    }
                    context.set_status(ActionStatus::Success);
                }
            }
            context.report_done();
        }));
    }
}

impl Drop for ResourceLockingFilter {
    fn drop(&mut self) {
        let finalize_here = {
            let mut control = self.shared.control.lock();
            if control.done {
                false
            } else {
                control.failed = true;
                control.done = true;
                self.shared.done_cond.notify_all();
                true
            }
        };
        if finalize_here {
            let engine = Arc::clone(&self.engine);
            let shared = Arc::clone(&self.shared);
            self.engine
                .run_or_post(Box::new(move || shared.finalize(&engine)));
        }
    }
}
