//! Integration tests for script execution through the CLI run context

use actionflow::cli::{Commands, RunContext};
use actionflow::{ActionSource, ActionStatus};
use std::fs;
use tempfile::TempDir;

use crate::integration::with_xdg_env;

fn run_context(workspace: &TempDir) -> RunContext {
    let xdg = TempDir::new().unwrap();
    with_xdg_env(&xdg, || {
        RunContext::new(workspace.path().to_path_buf(), None).unwrap()
    })
}

const SCRIPT: &str = "\
# build a volume and threshold it
NewGroup nx=6 ny=6 nz=3 name='Scan'
NewDataLayer group_id=group_0 seed=5

Bogus value=1
ThresholdFilter target=<active> lower=10 upper=120
NewMaskLayer group_id=group_0
Undo
";

#[test]
fn test_run_script_reports_every_command() {
    let workspace = TempDir::new().unwrap();
    let context = run_context(&workspace);
    let report = context.run_script(SCRIPT, ActionSource::Script);

    let lines: Vec<usize> = report.commands.iter().map(|c| c.line).collect();
    assert_eq!(lines, vec![2, 3, 5, 6, 7, 8]);
    let statuses: Vec<ActionStatus> = report.commands.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![
            ActionStatus::Success,
            ActionStatus::Success,
            ActionStatus::Invalid,
            ActionStatus::Success,
            ActionStatus::Success,
            ActionStatus::Success,
        ]
    );
    assert!(!report.all_succeeded());
    assert!(report.commands[2].errors[0].starts_with("Invalid command:"));

    assert_eq!(report.registry.resource_ids(), vec!["layer_0", "layer_1"]);
    assert_eq!(report.undo_items, 2);
    assert_eq!(report.redo_items, 1);
    assert_eq!(report.provenance_steps, 2);
}

#[test]
fn test_execute_run_writes_json_report() {
    let workspace = TempDir::new().unwrap();
    let script = workspace.path().join("build.txt");
    fs::write(&script, SCRIPT).unwrap();
    let context = run_context(&workspace);

    let output = context
        .execute(&Commands::Run {
            script,
            format: "json".to_string(),
        })
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["commands"].as_array().unwrap().len(), 6);
    assert_eq!(json["commands"][2]["status"], "Invalid");
    assert_eq!(json["registry"]["groups"][0]["name"], "Scan");
}

#[test]
fn test_execute_exec_renders_text() {
    let workspace = TempDir::new().unwrap();
    let context = run_context(&workspace);
    let output = context
        .execute(&Commands::Exec {
            commands: vec![
                "NewGroup nx=2 ny=2 nz=1".to_string(),
                "NewMaskLayer group_id=group_0 name=Roi".to_string(),
            ],
            format: "text".to_string(),
        })
        .unwrap();

    assert!(output.contains("NewGroup nx=2 ny=2 nz=1  -> group_0"));
    assert!(output.contains("*layer_0 Roi (mask, available)"));
    assert!(output.contains("Undo items: 1  Redo items: 0  Provenance steps: 1"));
}

#[test]
fn test_execute_usage_and_config() {
    let workspace = TempDir::new().unwrap();
    fs::create_dir_all(workspace.path().join("config")).unwrap();
    fs::write(
        workspace.path().join("config").join("config.toml"),
        "[history]\nmax_entries = 50\n",
    )
    .unwrap();
    let context = run_context(&workspace);

    let usage = context
        .execute(&Commands::Usage {
            kind: Some("newmasklayer".to_string()),
        })
        .unwrap();
    assert_eq!(usage, "NewMaskLayer group_id=<group_id> [name=Mask]");

    let all = context.execute(&Commands::Usage { kind: None }).unwrap();
    assert_eq!(all.lines().count(), context.engine().command_kinds().len());

    assert!(context
        .execute(&Commands::Usage {
            kind: Some("Missing".to_string()),
        })
        .is_err());

    let config = context.execute(&Commands::Config).unwrap();
    assert!(config.contains("[history]"));
    assert!(config.contains("max_entries = 50"));
}

#[test]
fn test_run_context_with_explicit_config_file() {
    let workspace = TempDir::new().unwrap();
    let config_file = workspace.path().join("custom.toml");
    fs::write(&config_file, "[undo]\nenabled = false\n").unwrap();

    let context = RunContext::new(workspace.path().to_path_buf(), Some(config_file)).unwrap();
    let report = context.run_script(
        "NewGroup nx=1 ny=1 nz=1\nNewMaskLayer group_id=group_0\nUndo\n",
        ActionSource::CommandLine,
    );
    assert_eq!(report.commands[2].status, ActionStatus::Invalid);
    assert_eq!(report.undo_items, 0);
    assert_eq!(report.registry.resource_ids(), vec!["layer_0"]);
}
