//! Configuration System
//!
//! Layered engine configuration: built-in defaults, the global config file, workspace config
//! files and `ACTIONFLOW__*` environment variables, in increasing precedence.

use crate::error::EngineError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod merge;
mod sources;

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub undo: UndoConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub provenance: ProvenanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serialization thread settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Name of the thread that executes all commands
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Prefix for filter worker thread names
    #[serde(default = "default_worker_prefix")]
    pub worker_thread_prefix: String,
}

fn default_thread_name() -> String {
    "action-dispatch".to_string()
}

fn default_worker_prefix() -> String {
    "filter".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            worker_thread_prefix: default_worker_prefix(),
        }
    }
}

/// Resource registry limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Largest voxel count a group may have; every layer of the group allocates this many bytes
    #[serde(default = "default_max_group_voxels")]
    pub max_group_voxels: u64,
}

fn default_max_group_voxels() -> u64 {
    1 << 30
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_group_voxels: default_max_group_voxels(),
        }
    }
}

/// Undo buffer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoConfig {
    /// A disabled buffer drops every item it is given
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of undo items kept
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Total checkpoint memory the undo list may hold before old items are evicted
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_items() -> usize {
    100
}

fn default_memory_budget() -> u64 {
    512 * 1024 * 1024
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: default_max_items(),
            memory_budget_bytes: default_memory_budget(),
        }
    }
}

/// Executed-command history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_entries")]
    pub max_entries: usize,
}

fn default_history_entries() -> usize {
    1000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_history_entries(),
        }
    }
}

/// Provenance settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceConfig {
    /// User recorded on provenance steps; falls back to `$USER`
    #[serde(default)]
    pub user: Option<String>,
}

impl ProvenanceConfig {
    pub fn resolved_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Dispatcher(String),
    Registry(String),
    Undo(String),
    History(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Dispatcher(msg) => write!(f, "Dispatcher: {}", msg),
            ValidationError::Registry(msg) => write!(f, "Registry: {}", msg),
            ValidationError::Undo(msg) => write!(f, "Undo: {}", msg),
            ValidationError::History(msg) => write!(f, "History: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl EngineConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.dispatcher.thread_name.trim().is_empty() {
            errors.push(ValidationError::Dispatcher(
                "Thread name cannot be empty".to_string(),
            ));
        }
        if self.registry.max_group_voxels == 0 {
            errors.push(ValidationError::Registry(
                "max_group_voxels must be at least 1".to_string(),
            ));
        }
        if self.undo.enabled && self.undo.max_items == 0 {
            errors.push(ValidationError::Undo(
                "max_items must be at least 1 when undo is enabled".to_string(),
            ));
        }
        if self.history.max_entries == 0 {
            errors.push(ValidationError::History(
                "max_entries must be at least 1".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold the errors into a single [`EngineError`].
    pub fn ensure_valid(&self) -> Result<(), EngineError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            EngineError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }
}

/// Loads [`EngineConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    pub fn load(workspace_root: &Path) -> Result<EngineConfig, EngineError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder
            .add_source(
                Environment::with_prefix("ACTIONFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a single TOML file layered over the defaults.
    pub fn load_from_file(path: &Path) -> Result<EngineConfig, EngineError> {
        if !path.exists() {
            return Err(EngineError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Built-in defaults only.
    pub fn defaults() -> Result<EngineConfig, EngineError> {
        let config: Config = merge::merge_policy::builder_with_defaults()?.build()?;
        Ok(config.try_deserialize()?)
    }
}
