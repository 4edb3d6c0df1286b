//! Integration tests for background filters: locking, abort and result installation

use actionflow::registry::ResourceState;
use actionflow::{action_handle, ActionContext, ActionStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::integration::{
    engine, group_with_data_layer, run, run_ok, script_context, Gate, GatedCopy, WorkerLock,
};

#[test]
fn test_threshold_installs_expected_mask() {
    let engine = engine();
    let (group, layer) = group_with_data_layer(&engine, [7, 3, 4]);
    let source = engine.registry().find(&layer).unwrap().data().to_vec();

    let mask = run_ok(
        &engine,
        &format!("ThresholdFilter target={} lower=50 upper=180", layer),
    );
    engine.wait_until_idle();

    let expected: Vec<u8> = source
        .iter()
        .map(|&v| u8::from((50..=180).contains(&v)))
        .collect();
    let installed = engine.registry().find(&mask).unwrap();
    assert_eq!(*installed.data(), expected);
    assert_eq!(installed.state(), ResourceState::Available);
    assert_eq!(
        engine.registry().find(&layer).unwrap().state(),
        ResourceState::Available
    );
    assert_eq!(
        engine.registry().group_members(&group).unwrap(),
        vec![layer, mask]
    );
    assert_eq!(engine.filters().active_count(), 0);
}

#[test]
fn test_threshold_replace_deletes_source_and_undo_restores_it() {
    let engine = engine();
    let (group, layer) = group_with_data_layer(&engine, [4, 4, 2]);
    let before = engine.registry().snapshot();

    let mask = run_ok(
        &engine,
        &format!("ThresholdFilter target={} replace=true", layer),
    );
    engine.wait_until_idle();
    assert!(!engine.registry().contains(&layer));
    assert_eq!(engine.registry().group_members(&group).unwrap(), vec![mask]);

    run_ok(&engine, "Undo");
    assert_eq!(engine.registry().group_members(&group).unwrap(), vec![layer]);
    assert!(before.same_content(&engine.registry().snapshot()));
}

#[test]
fn test_invalid_threshold_range_is_rejected() {
    let engine = engine();
    let (_group, layer) = group_with_data_layer(&engine, [2, 2, 1]);
    let context = run(
        &engine,
        &format!("ThresholdFilter target={} lower=200 upper=100", layer),
    );
    assert_eq!(context.status(), ActionStatus::Invalid);
    assert_eq!(engine.registry().resource_count(), 1);
    assert_eq!(engine.undo_buffer().num_undo_items(), 1);
}

#[test]
fn test_undo_aborts_running_filter_and_removes_its_output() {
    let engine = engine();
    let (_group, layer) = group_with_data_layer(&engine, [4, 4, 4]);
    let before = engine.registry().snapshot();
    let gate = Gate::new();

    let copy_context = script_context();
    engine
        .post_and_wait(
            action_handle(GatedCopy {
                target: layer.clone(),
                gate: Arc::clone(&gate),
            }),
            Arc::clone(&copy_context),
        )
        .unwrap();
    gate.wait_entered(1);
    assert_eq!(engine.filters().active_count(), 1);
    assert_eq!(
        engine.registry().find(&layer).unwrap().state(),
        ResourceState::InUse
    );

    assert_eq!(run_ok(&engine, "Undo"), "GatedCopy");
    assert!(copy_context.wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(copy_context.status(), ActionStatus::Error);

    assert_eq!(engine.filters().active_count(), 0);
    assert_eq!(
        engine.registry().find(&layer).unwrap().state(),
        ResourceState::Available
    );
    assert!(before.same_content(&engine.registry().snapshot()));
    assert_eq!(engine.undo_buffer().num_redo_items(), 1);
    gate.open();
}

#[test]
fn test_deleting_input_aborts_filter() {
    let engine = engine();
    let (group, layer) = group_with_data_layer(&engine, [3, 3, 3]);
    let gate = Gate::new();

    let copy_context = script_context();
    engine
        .post_and_wait(
            action_handle(GatedCopy {
                target: layer.clone(),
                gate: Arc::clone(&gate),
            }),
            Arc::clone(&copy_context),
        )
        .unwrap();
    gate.wait_entered(1);

    run_ok(&engine, &format!("DeleteLayers layers=[{}]", layer));
    assert!(copy_context.wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(copy_context.status(), ActionStatus::Error);
    engine.wait_until_idle();

    assert!(engine.registry().group_members(&group).unwrap().is_empty());
    assert_eq!(engine.filters().active_count(), 0);
    gate.open();
}

#[test]
fn test_filter_reading_layer_makes_exclusive_commands_unavailable() {
    let engine = engine();
    let (_group, layer) = group_with_data_layer(&engine, [3, 3, 1]);
    let gate = Gate::new();

    let copy_context = script_context();
    engine
        .post_and_wait(
            action_handle(GatedCopy {
                target: layer.clone(),
                gate: Arc::clone(&gate),
            }),
            Arc::clone(&copy_context),
        )
        .unwrap();
    gate.wait_entered(1);
    let output = "layer_1".to_string();
    assert_eq!(
        engine.registry().find(&output).unwrap().state(),
        ResourceState::Creating
    );

    let in_place = run(&engine, &format!("InvertFilter target={} replace=true", layer));
    assert_eq!(in_place.status(), ActionStatus::Unavailable);
    assert_eq!(in_place.needed_resource(), Some(layer.clone()));

    let reading_output = run(&engine, &format!("ThresholdFilter target={}", output));
    assert_eq!(reading_output.status(), ActionStatus::Unavailable);
    assert_eq!(reading_output.needed_resource(), Some(output.clone()));

    // Shared readers of the input are fine.
    let mask = run_ok(&engine, &format!("ThresholdFilter target={}", layer));
    assert!(engine.registry().contains(&mask));

    gate.open();
    assert!(copy_context.wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(copy_context.status(), ActionStatus::Success);
    engine.wait_until_idle();
    let copied = engine.registry().find(&output).unwrap();
    assert_eq!(
        *copied.data(),
        *engine.registry().find(&layer).unwrap().data()
    );
    assert_eq!(copied.state(), ResourceState::Available);
}

#[test]
fn test_worker_lock_conflict_fails_without_blocking() {
    let engine = engine();
    let (_group, layer) = group_with_data_layer(&engine, [2, 2, 2]);
    let gate = Gate::new();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let contexts: Vec<_> = (0..2)
        .map(|_| {
            let context = script_context();
            engine
                .post_and_wait(
                    action_handle(WorkerLock {
                        target: layer.clone(),
                        gate: Arc::clone(&gate),
                        attempts: Arc::clone(&attempts),
                    }),
                    Arc::clone(&context),
                )
                .unwrap();
            context
        })
        .collect();

    gate.wait_entered(2);
    {
        let attempts = attempts.lock();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts.iter().filter(|a| a.is_ok()).count(), 1);
    }
    assert_eq!(
        engine.registry().find(&layer).unwrap().state(),
        ResourceState::Processing
    );

    gate.open();
    for context in &contexts {
        assert!(context.wait_done_timeout(Duration::from_secs(10)));
    }
    let statuses: Vec<ActionStatus> = contexts.iter().map(|c| c.status()).collect();
    assert!(statuses.contains(&ActionStatus::Success));
    assert!(statuses.contains(&ActionStatus::Error));

    engine.wait_until_idle();
    assert_eq!(
        engine.registry().find(&layer).unwrap().state(),
        ResourceState::Available
    );
}

#[test]
fn test_deleting_layer_mid_computation() {
    let engine = engine();
    let (group, layer) = group_with_data_layer(&engine, [3, 2, 2]);
    let gate = Gate::new();

    // A layer still being created cannot be deleted.
    let copy_context = script_context();
    engine
        .post_and_wait(
            action_handle(GatedCopy {
                target: layer.clone(),
                gate: Arc::clone(&gate),
            }),
            Arc::clone(&copy_context),
        )
        .unwrap();
    gate.wait_entered(1);
    let output = "layer_1".to_string();
    let delete = run(&engine, &format!("DeleteLayers layers=[{}]", output));
    assert_eq!(delete.status(), ActionStatus::Unavailable);
    assert_eq!(delete.needed_resource(), Some(output.clone()));
    assert_eq!(engine.undo_buffer().num_undo_items(), 2);

    gate.open();
    assert!(copy_context.wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(copy_context.status(), ActionStatus::Success);
    engine.wait_until_idle();
    assert!(engine.registry().find(&output).unwrap().has_valid_data());

    // A layer being processed can be deleted; its filter is stopped and undo brings the layer
    // back with its data untouched.
    let bytes = engine.registry().find(&layer).unwrap().data().to_vec();
    let hold = Gate::new();
    let lock_context = script_context();
    engine
        .post_and_wait(
            action_handle(WorkerLock {
                target: layer.clone(),
                gate: Arc::clone(&hold),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }),
            Arc::clone(&lock_context),
        )
        .unwrap();
    hold.wait_entered(1);
    assert_eq!(
        engine.registry().find(&layer).unwrap().state(),
        ResourceState::Processing
    );

    run_ok(&engine, &format!("DeleteLayers layers=[{}]", layer));
    assert!(!engine.registry().contains(&layer));

    let undo = script_context();
    engine.post_command("Undo", Arc::clone(&undo)).unwrap();
    hold.open();
    assert!(undo.wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(undo.status(), ActionStatus::Success);
    assert!(lock_context.wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(lock_context.status(), ActionStatus::Error);
    engine.wait_until_idle();

    let restored = engine.registry().find(&layer).unwrap();
    assert_eq!(restored.state(), ResourceState::Available);
    assert_eq!(*restored.data(), bytes);
    assert_eq!(
        engine.registry().group_members(&group).unwrap(),
        vec![layer.clone(), output.clone()]
    );
    let inverted = run_ok(&engine, &format!("InvertFilter target={}", layer));
    engine.wait_until_idle();
    assert!(engine.registry().find(&inverted).unwrap().has_valid_data());
}
