//! Integration tests for FIFO execution on the serialization thread

use actionflow::events::EngineEvent;
use actionflow::{ActionContext, ActionSource, ActionStatus, BasicContext};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::integration::{engine, run, run_ok};

#[test]
fn test_commands_from_one_thread_run_in_post_order() {
    let engine = engine();
    let events = engine.events().subscribe();

    let contexts: Vec<_> = (0..20)
        .map(|i| {
            let context = BasicContext::handle(ActionSource::Script);
            engine
                .post_command(
                    &format!("NewGroup nx=1 ny=1 nz=1 name=g{}", i),
                    Arc::clone(&context),
                )
                .unwrap();
            context
        })
        .collect();
    engine.flush().unwrap();

    for (i, context) in contexts.iter().enumerate() {
        assert!(context.is_done());
        assert_eq!(
            context.result().unwrap().to_string(),
            format!("group_{}", i),
            "group ids follow posting order"
        );
    }

    let started: Vec<String> = events
        .try_iter()
        .filter_map(|event| match event {
            EngineEvent::PreAction { command, .. } => Some(command),
            _ => None,
        })
        .collect();
    assert_eq!(started.len(), 20);
    for (i, command) in started.iter().enumerate() {
        assert!(command.contains(&format!("name='g{}'", i)), "{}", command);
    }
}

#[test]
fn test_posts_from_many_threads_keep_per_thread_order() {
    let engine = engine();
    let threads = 4;
    let per_thread = 25;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..per_thread {
                    engine
                        .post_command(
                            &format!("NewGroup nx=1 ny=1 nz=1 name=t{}_{}", t, i),
                            BasicContext::handle(ActionSource::Script),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    engine.wait_until_idle();

    let commands = engine.history().commands();
    assert_eq!(commands.len(), threads * per_thread);
    assert_eq!(engine.registry().group_ids().len(), threads * per_thread);
    for t in 0..threads {
        let positions: Vec<usize> = (0..per_thread)
            .map(|i| {
                let needle = format!("name='t{}_{}'", t, i);
                commands.iter().position(|c| c.contains(&needle)).unwrap()
            })
            .collect();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "thread {} executed out of order: {:?}",
            t,
            positions
        );
    }
}

#[test]
fn test_post_and_wait_on_dispatch_thread_panics() {
    let engine = engine();
    let inner = Arc::clone(&engine);
    let panicked = engine
        .run_on_dispatch_thread(move || {
            catch_unwind(AssertUnwindSafe(|| {
                let action = inner.create_action("NewGroup nx=1 ny=1 nz=1").unwrap();
                let _ = inner.post_and_wait(action, BasicContext::handle(ActionSource::None));
            }))
            .is_err()
        })
        .unwrap();
    assert!(panicked);

    // The serialization thread survives the misuse.
    assert_eq!(run_ok(&engine, "NewGroup nx=1 ny=1 nz=1"), "group_0");
}

#[test]
fn test_wait_until_idle_on_dispatch_thread_panics() {
    let engine = engine();
    let inner = Arc::clone(&engine);
    let panicked = engine
        .run_on_dispatch_thread(move || {
            catch_unwind(AssertUnwindSafe(|| inner.wait_until_idle())).is_err()
        })
        .unwrap();
    assert!(panicked);
}

#[test]
fn test_run_or_post_inside_a_job_runs_inline() {
    let engine = engine();
    let inner = Arc::clone(&engine);
    let order = engine
        .run_on_dispatch_thread(move || {
            let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let nested = Arc::clone(&order);
            inner.run_or_post(Box::new(move || nested.lock().push("nested")));
            order.lock().push("after");
            let result = order.lock().clone();
            result
        })
        .unwrap();
    assert_eq!(order, vec!["nested", "after"]);
}

#[test]
fn test_events_and_history_follow_execution() {
    let engine = engine();
    let events = engine.events().subscribe();

    let group = run_ok(&engine, "NewGroup nx=2 ny=2 nz=1");
    run_ok(&engine, &format!("NewMaskLayer group_id={}", group));
    let rejected = run(&engine, "NewMaskLayer group_id=group_9");
    assert_eq!(rejected.status(), ActionStatus::Invalid);

    let received: Vec<EngineEvent> = events.try_iter().collect();
    let kinds: Vec<&str> = received
        .iter()
        .map(|event| match event {
            EngineEvent::PreAction { .. } => "pre",
            EngineEvent::PostAction { .. } => "post",
            EngineEvent::UndoBufferChanged { .. } => "undo",
            EngineEvent::ProgressStarted { .. } | EngineEvent::ProgressFinished { .. } => {
                "progress"
            }
        })
        .collect();
    // The rejected command never reaches `run`.
    assert_eq!(kinds, vec!["pre", "post", "pre", "undo", "post"]);

    match &received[3] {
        EngineEvent::UndoBufferChanged { undo_tag, redo_tag } => {
            assert_eq!(undo_tag.as_deref(), Some("NewMaskLayer"));
            assert!(redo_tag.is_none());
        }
        other => panic!("unexpected event {:?}", other),
    }

    let history = engine.history().entries();
    assert_eq!(history.len(), 2);
    assert!(history[0].command.starts_with("NewGroup "));
    assert!(history[1].command.starts_with("NewMaskLayer "));
    assert!(history[0].sequence < history[1].sequence);
    assert_eq!(history[1].source, ActionSource::Script);
}
