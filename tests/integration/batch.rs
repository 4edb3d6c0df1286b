//! Integration tests for batched submissions

use actionflow::{action_handle, ActionContext, ActionStatus};
use std::sync::Arc;
use std::time::Duration;

use crate::integration::{engine, group_with_data_layer, run_ok, script_context, Gate, GatedCopy};

#[test]
fn test_batch_continues_past_invalid_member() {
    let engine = engine();
    let group = run_ok(&engine, "NewGroup nx=2 ny=2 nz=2");

    let actions = vec![
        engine
            .create_action(&format!("NewMaskLayer group_id={}", group))
            .unwrap(),
        engine.create_action("NewMaskLayer group_id=group_7").unwrap(),
        engine
            .create_action(&format!("NewDataLayer group_id={}", group))
            .unwrap(),
    ];
    let parent = script_context();
    let children = engine
        .post_and_wait_batch(actions, parent.clone())
        .unwrap();

    assert!(parent.wait_done_timeout(Duration::from_secs(10)));
    let statuses: Vec<ActionStatus> = children.iter().map(|c| c.status()).collect();
    assert_eq!(
        statuses,
        vec![
            ActionStatus::Success,
            ActionStatus::Invalid,
            ActionStatus::Success
        ]
    );
    assert_eq!(parent.status(), ActionStatus::Invalid);
    assert_eq!(parent.errors().len(), 1);
    assert!(parent.errors()[0].contains("group_7"));

    assert_eq!(engine.registry().group_members(&group).unwrap().len(), 2);
    assert_eq!(engine.undo_buffer().num_undo_items(), 2);
}

#[test]
fn test_batch_of_valid_members_succeeds() {
    let engine = engine();
    let group = run_ok(&engine, "NewGroup nx=1 ny=1 nz=1");
    let actions = (0..3)
        .map(|_| {
            engine
                .create_action(&format!("NewMaskLayer group_id={}", group))
                .unwrap()
        })
        .collect();

    let parent = script_context();
    let children = engine.post_batch(actions, parent.clone()).unwrap();
    assert!(parent.wait_done_timeout(Duration::from_secs(10)));

    assert_eq!(parent.status(), ActionStatus::Success);
    let ids: Vec<String> = children
        .iter()
        .map(|c| c.result().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["layer_0", "layer_1", "layer_2"]);
    assert_eq!(engine.history().len(), 4);
}

#[test]
fn test_batch_does_not_wait_for_asynchronous_members() {
    let engine = engine();
    let (group, layer) = group_with_data_layer(&engine, [2, 2, 1]);
    let gate = Gate::new();
    let actions = vec![
        action_handle(GatedCopy {
            target: layer.clone(),
            gate: Arc::clone(&gate),
        }),
        engine
            .create_action(&format!("NewMaskLayer group_id={}", group))
            .unwrap(),
    ];

    let parent = script_context();
    let children = engine
        .post_and_wait_batch(actions, parent.clone())
        .unwrap();
    gate.wait_entered(1);

    // The copy is still parked at the gate, yet the batch has finished.
    assert!(parent.is_done());
    assert_eq!(parent.status(), ActionStatus::Success);
    assert!(!children[0].is_done());
    assert_eq!(children[1].status(), ActionStatus::Success);

    gate.open();
    assert!(children[0].wait_done_timeout(Duration::from_secs(10)));
    assert_eq!(children[0].status(), ActionStatus::Success);
    engine.wait_until_idle();
    assert_eq!(engine.registry().group_members(&group).unwrap().len(), 3);
}
