//! Shared test utilities for integration tests
//!
//! Engine setup helpers, a gate for holding filter workers at a known point, and two
//! test-only filter commands built on the resource-locking base.

use actionflow::action::{cached_info, ActionInfo};
use actionflow::filter::ResourceLockingFilter;
use actionflow::provenance::ProvenanceStep;
use actionflow::registry::ResourceKind;
use actionflow::{
    Action, ActionContext, ActionContextHandle, ActionError, ActionResult, ActionScope,
    ActionSource, BasicContext, CommandProperties, Engine,
};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

/// Global mutex to serialize XDG environment variable access across all tests
static XDG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

pub fn engine() -> Arc<Engine> {
    Engine::with_defaults().unwrap()
}

pub fn script_context() -> ActionContextHandle {
    BasicContext::handle(ActionSource::Script)
}

/// Post `line`, wait for its job and for its context to complete.
pub fn run(engine: &Arc<Engine>, line: &str) -> ActionContextHandle {
    let context = script_context();
    engine
        .post_and_wait_command(line, Arc::clone(&context))
        .unwrap();
    assert!(
        context.wait_done_timeout(Duration::from_secs(10)),
        "'{}' did not complete",
        line
    );
    context
}

/// Run `line` and return its text result, failing the test unless it succeeded.
pub fn run_ok(engine: &Arc<Engine>, line: &str) -> String {
    let context = run(engine, line);
    assert_eq!(
        context.status(),
        actionflow::ActionStatus::Success,
        "'{}' failed: {:?}",
        line,
        context.errors()
    );
    match context.result() {
        Some(ActionResult::Text(text)) => text,
        other => format!("{:?}", other),
    }
}

/// Group of the given size plus one data layer; returns `(group, layer)`.
pub fn group_with_data_layer(engine: &Arc<Engine>, dims: [usize; 3]) -> (String, String) {
    let group = run_ok(
        engine,
        &format!("NewGroup nx={} ny={} nz={}", dims[0], dims[1], dims[2]),
    );
    let layer = run_ok(engine, &format!("NewDataLayer group_id={}", group));
    (group, layer)
}

/// Run `f` with `XDG_CONFIG_HOME` and `HOME` pointing into `test_dir`, restoring them afterwards.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let home = std::env::var("HOME").ok();
    let xdg_config_home = std::env::var("XDG_CONFIG_HOME").ok();

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", &test_home);
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());

    let result = f();

    match home {
        Some(orig) => std::env::set_var("HOME", orig),
        None => std::env::remove_var("HOME"),
    }
    match xdg_config_home {
        Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}

#[derive(Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Holds filter workers until the test opens it.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(&self) {
        self.state.lock().entered += 1;
        self.cond.notify_all();
    }

    /// Block until `count` workers have entered.
    pub fn wait_entered(&self, count: usize) {
        let mut state = self.state.lock();
        while state.entered < count {
            assert!(
                !self
                    .cond
                    .wait_for(&mut state, Duration::from_secs(10))
                    .timed_out(),
                "workers did not reach the gate"
            );
        }
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.cond.notify_all();
    }

    /// Returns whether the gate is open, waiting at most `timeout`.
    pub fn wait_open(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            self.cond.wait_for(&mut state, timeout);
        }
        state.open
    }
}

const COPY_DEFINITION: &str = r#"
name = "GatedCopy"
undoable = true
changes_project_data = true

[[parameters]]
name = "target"
"#;

/// Copies `target` into a new layer once the gate opens, polling abort meanwhile.
pub struct GatedCopy {
    pub target: String,
    pub gate: Arc<Gate>,
}

actionflow::action_parameters!(GatedCopy { target });

impl Action for GatedCopy {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, COPY_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::UNDOABLE | CommandProperties::ASYNCHRONOUS
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let engine = scope.engine;
        let source = engine.registry().find(&self.target)?;
        let mut filter = ResourceLockingFilter::new(engine, "GatedCopy");
        filter.lock_for_use(&source)?;
        filter.connect_abort(&source);
        let output = filter.create_and_lock_new(&source, ResourceKind::Data, "copy")?;

        let item = filter.create_undo_item("GatedCopy");
        let step = ProvenanceStep::new("GatedCopy", "")
            .with_inputs([source.provenance_id()])
            .with_outputs([output.provenance_id()]);
        engine.record_undoable(scope, item, step);

        let gate = Arc::clone(&self.gate);
        filter.start(Arc::clone(scope.context), move |filter| {
            gate.enter();
            loop {
                if filter.check_abort() {
                    return Err(ActionError::Failed("aborted".to_string()));
                }
                if gate.wait_open(Duration::from_millis(5)) {
                    break;
                }
            }
            filter.dispatch_insert_result(&output, source.data().to_vec())?;
            Ok(Some(ActionResult::Text(output.id().to_string())))
        })?;
        Ok(None)
    }
}

const LOCK_DEFINITION: &str = r#"
name = "WorkerLock"

[[parameters]]
name = "target"
"#;

/// Takes an exclusive lock on `target` from its worker thread and holds it until the gate
/// opens. Every attempt is recorded in `attempts`.
pub struct WorkerLock {
    pub target: String,
    pub gate: Arc<Gate>,
    pub attempts: Arc<Mutex<Vec<Result<(), ActionError>>>>,
}

actionflow::action_parameters!(WorkerLock { target });

impl Action for WorkerLock {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, LOCK_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::ASYNCHRONOUS
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let resource = scope.engine.registry().find(&self.target)?;
        let filter = ResourceLockingFilter::new(scope.engine, "WorkerLock");
        let gate = Arc::clone(&self.gate);
        let attempts = Arc::clone(&self.attempts);
        filter.start(Arc::clone(scope.context), move |filter| {
            let outcome = filter.lock_for_processing(&resource, false);
            attempts.lock().push(outcome.clone());
            gate.enter();
            outcome?;
            while !gate.wait_open(Duration::from_millis(5)) {}
            Ok(None)
        })?;
        Ok(None)
    }
}
