//! Execution contexts.
//!
//! A context travels with one submission and collects its status, messages and result. The
//! dispatcher (synchronous commands) or the filter worker (asynchronous commands) calls
//! [`ActionContext::report_done`] exactly once; submitters block on [`ActionContext::wait_done`].

use crate::action::ActionResult;
use crate::types::ResourceId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Final status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Success,
    Error,
    Invalid,
    Unavailable,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Success => "success",
            ActionStatus::Error => "error",
            ActionStatus::Invalid => "invalid",
            ActionStatus::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Who submitted the command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSource {
    None,
    InterfaceWidget,
    InterfaceMouse,
    InterfaceKeyboard,
    InterfaceMenu,
    Script,
    CommandLine,
    Provenance,
    UndoBuffer,
}

#[derive(Debug)]
struct ContextInner {
    status: ActionStatus,
    errors: Vec<String>,
    warnings: Vec<String>,
    messages: Vec<String>,
    result: Option<ActionResult>,
    needed_resource: Option<ResourceId>,
    done: bool,
}

/// Shared bookkeeping behind every context implementation.
#[derive(Debug)]
pub struct ContextState {
    inner: Mutex<ContextInner>,
    done_cond: Condvar,
}

impl Default for ContextState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ContextInner {
                status: ActionStatus::Success,
                errors: Vec::new(),
                warnings: Vec::new(),
                messages: Vec::new(),
                result: None,
                needed_resource: None,
                done: false,
            }),
            done_cond: Condvar::new(),
        }
    }
}

/// Per-submission reporting surface.
pub trait ActionContext: Send + Sync {
    fn state(&self) -> &ContextState;

    fn source(&self) -> ActionSource;

    fn report_error(&self, message: &str) {
        self.state().inner.lock().errors.push(message.to_string());
    }

    fn report_warning(&self, message: &str) {
        self.state().inner.lock().warnings.push(message.to_string());
    }

    fn report_message(&self, message: &str) {
        self.state().inner.lock().messages.push(message.to_string());
    }

    /// Record that the command could not run because `resource` is busy.
    fn report_need_resource(&self, resource: &str) {
        let mut inner = self.state().inner.lock();
        inner.needed_resource = Some(resource.to_string());
        inner.status = ActionStatus::Unavailable;
    }

    fn report_result(&self, result: ActionResult) {
        self.state().inner.lock().result = Some(result);
    }

    fn set_status(&self, status: ActionStatus) {
        self.state().inner.lock().status = status;
    }

    /// Mark the submission complete. Only the first call has an effect; returns whether this
    /// call was the one that completed it.
    fn report_done(&self) -> bool {
        let state = self.state();
        let mut inner = state.inner.lock();
        if inner.done {
            warn!("report_done called more than once for the same submission");
            return false;
        }
        inner.done = true;
        state.done_cond.notify_all();
        true
    }

    fn status(&self) -> ActionStatus {
        self.state().inner.lock().status
    }

    fn result(&self) -> Option<ActionResult> {
        self.state().inner.lock().result.clone()
    }

    fn errors(&self) -> Vec<String> {
        self.state().inner.lock().errors.clone()
    }

    fn warnings(&self) -> Vec<String> {
        self.state().inner.lock().warnings.clone()
    }

    fn messages(&self) -> Vec<String> {
        self.state().inner.lock().messages.clone()
    }

    /// All reported errors joined with newlines.
    fn error_message(&self) -> Option<String> {
        let inner = self.state().inner.lock();
        if inner.errors.is_empty() {
            None
        } else {
            Some(inner.errors.join("\n"))
        }
    }

    fn needed_resource(&self) -> Option<ResourceId> {
        self.state().inner.lock().needed_resource.clone()
    }

    fn is_done(&self) -> bool {
        self.state().inner.lock().done
    }

    fn wait_done(&self) {
        let state = self.state();
        let mut inner = state.inner.lock();
        while !inner.done {
            state.done_cond.wait(&mut inner);
        }
    }

    /// Returns `false` if the timeout elapsed first.
    fn wait_done_timeout(&self, timeout: Duration) -> bool {
        let state = self.state();
        let deadline = Instant::now() + timeout;
        let mut inner = state.inner.lock();
        while !inner.done {
            if state.done_cond.wait_until(&mut inner, deadline).timed_out() {
                return inner.done;
            }
        }
        true
    }
}

pub type ActionContextHandle = Arc<dyn ActionContext>;

/// Standalone context owned by a submitter
#[derive(Debug)]
pub struct BasicContext {
    source: ActionSource,
    state: ContextState,
}

impl BasicContext {
    pub fn new(source: ActionSource) -> Self {
        Self {
            source,
            state: ContextState::default(),
        }
    }

    pub fn handle(source: ActionSource) -> ActionContextHandle {
        Arc::new(Self::new(source))
    }
}

impl ActionContext for BasicContext {
    fn state(&self) -> &ContextState {
        &self.state
    }

    fn source(&self) -> ActionSource {
        self.source
    }
}

/// Context nested inside another one.
///
/// Errors, warnings and messages are forwarded to the parent; status, result and the done flag
/// stay local.
pub struct ChildContext {
    parent: ActionContextHandle,
    source: ActionSource,
    state: ContextState,
}

impl ChildContext {
    pub fn new(parent: ActionContextHandle) -> Self {
        let source = parent.source();
        Self::with_source(parent, source)
    }

    pub fn with_source(parent: ActionContextHandle, source: ActionSource) -> Self {
        Self {
            parent,
            source,
            state: ContextState::default(),
        }
    }

    pub fn parent(&self) -> &ActionContextHandle {
        &self.parent
    }
}

impl ActionContext for ChildContext {
    fn state(&self) -> &ContextState {
        &self.state
    }

    fn source(&self) -> ActionSource {
        self.source
    }

    fn report_error(&self, message: &str) {
        self.state.inner.lock().errors.push(message.to_string());
        self.parent.report_error(message);
    }

    fn report_warning(&self, message: &str) {
        self.state.inner.lock().warnings.push(message.to_string());
        self.parent.report_warning(message);
    }

    fn report_message(&self, message: &str) {
        self.state.inner.lock().messages.push(message.to_string());
        self.parent.report_message(message);
    }
}

/// Context used when the undo buffer replays a command.
pub fn undo_context(parent: &ActionContextHandle) -> ActionContextHandle {
    Arc::new(ChildContext::with_source(
        Arc::clone(parent),
        ActionSource::UndoBuffer,
    ))
}
