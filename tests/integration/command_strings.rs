//! Integration tests for the command wire format and parameter binding

use actionflow::action::ParameterInfo;
use actionflow::config::EngineConfig;
use actionflow::{ActionContext, ActionStatus, Engine, EngineError, ParseError};

use crate::integration::{engine, group_with_data_layer, run, run_ok, script_context};

#[test]
fn test_malformed_command_lines() {
    let engine = engine();

    assert!(matches!(
        engine.create_action("Frobnicate size=3"),
        Err(ParseError::UnknownCommand(kind)) if kind == "Frobnicate"
    ));
    assert!(matches!(
        engine.create_action("   "),
        Err(ParseError::EmptyCommand)
    ));
    match engine.create_action("NewGroup nx=2") {
        Err(ParseError::MissingKey { key, usage }) => {
            assert_eq!(key, "ny");
            assert!(usage.starts_with("NewGroup nx=<nx> ny=<ny> nz=<nz>"));
        }
        other => panic!("expected missing key, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        engine.create_action("NewGroup nx=two ny=1 nz=1"),
        Err(ParseError::InvalidValue { key, .. }) if key == "nx"
    ));
    assert!(matches!(
        engine.create_action("NewGroup nx=1 ny=1 nz=1 colour=red"),
        Err(ParseError::UnknownKey { key, .. }) if key == "colour"
    ));
    assert!(matches!(
        engine.create_action("NewGroup nx=1 ny=1 nz=1 name='open"),
        Err(ParseError::UnterminatedQuote { .. })
    ));

    let posted = engine.post_command("Frobnicate", script_context());
    assert!(matches!(
        posted,
        Err(EngineError::Parse(ParseError::UnknownCommand(_)))
    ));
    assert!(engine.history().is_empty());
}

#[test]
fn test_kind_and_keys_are_case_insensitive() {
    let engine = engine();
    let action = engine
        .create_action("newgroup NX=3 Ny=2 nz=1 Name='Scan A'")
        .unwrap();
    assert_eq!(
        action.lock().export_to_string(),
        "NewGroup nx='3' ny='2' nz='1' name='Scan A'"
    );
}

#[test]
fn test_defaults_fill_optional_parameters() {
    let engine = engine();
    let action = engine.create_action("ThresholdFilter target=layer_0").unwrap();
    let exported = action.lock().export_parameters();
    assert_eq!(
        exported,
        vec![
            ("target", "layer_0".to_string()),
            ("lower", "0".to_string()),
            ("upper", "255".to_string()),
            ("replace", "false".to_string()),
        ]
    );

    let info = action.lock().info();
    let required: Vec<&ParameterInfo> = info.arguments().collect();
    assert_eq!(required.len(), 1);
    assert_eq!(required[0].name, "target");
    assert!(info.is_undoable());
    assert!(info.changes_project_data());
}

#[test]
fn test_exported_command_reparses_to_same_command() {
    let engine = engine();
    let line = r"NewDataLayer group_id=group_0 name='it\'s data' seed=9";
    let exported = engine.create_action(line).unwrap().lock().export_to_string();
    let again = engine
        .create_action(&exported)
        .unwrap()
        .lock()
        .export_to_string();
    assert_eq!(exported, again);
    assert!(exported.contains(r"name='it\'s data'"));
}

#[test]
fn test_usage_lines() {
    let engine = engine();
    assert_eq!(
        engine.usage("deletelayers").as_deref(),
        Some("DeleteLayers layers=<layers>")
    );
    assert_eq!(
        engine.usage("InvertFilter").as_deref(),
        Some("InvertFilter target=<target> [replace=false]")
    );
    assert!(engine.usage("Nope").is_none());

    let kinds = engine.command_kinds();
    for kind in ["NewGroup", "NewDataLayer", "ThresholdFilter", "Undo", "Redo"] {
        assert!(kinds.iter().any(|k| k == kind), "{} not registered", kind);
    }
}

#[test]
fn test_active_resource_placeholder() {
    let engine = engine();
    let (_group, layer) = group_with_data_layer(&engine, [3, 3, 1]);
    assert_eq!(engine.registry().active_resource(), Some(layer.clone()));

    let inverted = run_ok(&engine, "InvertFilter target=<active>");
    assert_ne!(inverted, layer);

    let history = engine.history().commands();
    assert!(
        history
            .last()
            .unwrap()
            .contains(&format!("target='{}'", layer)),
        "placeholder is resolved before the command is recorded"
    );

    run_ok(&engine, &format!("DeleteLayers layers=[{}]", layer));
    assert_eq!(engine.registry().active_resource(), None);
    let context = run(&engine, "InvertFilter target=<active>");
    assert_eq!(context.status(), ActionStatus::Invalid);
    assert_eq!(
        context.error_message().as_deref(),
        Some("No active resource")
    );
}

#[test]
fn test_missing_resource_is_invalid() {
    let engine = engine();
    let context = run(&engine, "InvertFilter target=layer_12");
    assert_eq!(context.status(), ActionStatus::Invalid);
    assert!(context.error_message().unwrap().contains("layer_12"));
    assert!(context.needed_resource().is_none());
}

#[test]
fn test_oversized_group_is_rejected() {
    let engine = engine();
    let huge = run(&engine, "NewGroup nx=1099511627776 ny=1024 nz=1");
    assert_eq!(huge.status(), ActionStatus::Invalid);
    assert!(engine.registry().group_ids().is_empty());
    assert_eq!(run_ok(&engine, "NewGroup nx=2 ny=2 nz=1"), "group_0");

    let mut config = EngineConfig::default();
    config.registry.max_group_voxels = 64;
    let small = Engine::new(config).unwrap();
    let too_big = run(&small, "NewGroup nx=8 ny=8 nz=2");
    assert_eq!(too_big.status(), ActionStatus::Invalid);
    assert!(too_big.error_message().unwrap().contains("exceeds the limit of 64 voxels"));
    let (group, _layer) = group_with_data_layer(&small, [8, 8, 1]);
    assert_eq!(group, "group_0");
}
