//! Integration tests for layered configuration

use actionflow::config::{global_config_path, ConfigLoader};
use actionflow::Engine;
use std::fs;
use tempfile::TempDir;

use crate::integration::{run_ok, with_xdg_env};

#[test]
fn test_global_config_from_xdg_config_home() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();

    let config = with_xdg_env(&test_dir, || {
        let path = global_config_path().unwrap();
        assert_eq!(path, test_dir.path().join("actionflow").join("config.toml"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[undo]\nmax_items = 3\n\n[provenance]\nuser = \"global\"\n").unwrap();
        ConfigLoader::load(workspace.path()).unwrap()
    });

    assert_eq!(config.undo.max_items, 3);
    assert_eq!(config.provenance.resolved_user(), "global");
    assert_eq!(config.history.max_entries, 1000);
}

#[test]
fn test_workspace_config_overrides_global() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    fs::create_dir_all(workspace.path().join("config")).unwrap();
    fs::write(
        workspace.path().join("config").join("config.toml"),
        "[undo]\nmax_items = 5\n",
    )
    .unwrap();

    let config = with_xdg_env(&test_dir, || {
        let path = global_config_path().unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[undo]\nmax_items = 3\nmemory_budget_bytes = 2048\n").unwrap();
        ConfigLoader::load(workspace.path()).unwrap()
    });

    assert_eq!(config.undo.max_items, 5);
    assert_eq!(config.undo.memory_budget_bytes, 2048);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let test_dir = TempDir::new().unwrap();
    let result = ConfigLoader::load_from_file(&test_dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_undo_item_limit_evicts_oldest() {
    let test_dir = TempDir::new().unwrap();
    let config_file = test_dir.path().join("engine.toml");
    fs::write(&config_file, "[undo]\nmax_items = 2\n\n[history]\nmax_entries = 3\n").unwrap();

    let engine = Engine::new(ConfigLoader::load_from_file(&config_file).unwrap()).unwrap();
    let group = run_ok(&engine, "NewGroup nx=2 ny=2 nz=1");
    for _ in 0..3 {
        run_ok(&engine, &format!("NewMaskLayer group_id={}", group));
    }

    assert_eq!(engine.undo_buffer().num_undo_items(), 2);
    assert_eq!(engine.history().len(), 3);
    run_ok(&engine, "Undo");
    run_ok(&engine, "Undo");
    assert!(!engine.undo_buffer().has_undo());
    assert_eq!(
        engine.registry().group_members(&group).unwrap(),
        vec!["layer_0".to_string()]
    );
}

#[test]
fn test_invalid_config_is_rejected_by_engine() {
    let test_dir = TempDir::new().unwrap();
    let config_file = test_dir.path().join("engine.toml");
    fs::write(&config_file, "[undo]\nmax_items = 0\n").unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_err());
    assert!(Engine::new(config).is_err());
}
