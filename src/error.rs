//! Error types for the action engine.

use crate::types::{FilterKey, GroupId, ResourceId};
use thiserror::Error;

/// Resource registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Resource '{id}' is busy ({state})")]
    ResourceBusy { id: ResourceId, state: String },

    #[error("Resource '{id}' is not locked by filter key {key}")]
    KeyMismatch { id: ResourceId, key: FilterKey },

    #[error("Resource already registered: {0}")]
    AlreadyExists(ResourceId),

    #[error("Data size mismatch for '{id}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        id: ResourceId,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid group dimensions: {0}")]
    InvalidDimensions(String),
}

/// Errors raised while parsing command strings and action definitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty command string")]
    EmptyCommand,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Expected '=' after key at position {position}")]
    MissingEquals { position: usize },

    #[error("Unterminated quoted value starting at position {position}")]
    UnterminatedQuote { position: usize },

    #[error("Invalid key at position {position}")]
    InvalidKey { position: usize },

    #[error("Unknown key '{key}' for command {kind}")]
    UnknownKey { kind: String, key: String },

    #[error("Missing required key '{key}'. Usage: {usage}")]
    MissingKey { key: String, usage: String },

    #[error("Invalid value '{value}' for key '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid action definition: {0}")]
    InvalidDefinition(String),
}

/// Outcome of a failed translate, validate or run step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Parameters are wrong; the command can never succeed as posted.
    #[error("{0}")]
    Invalid(String),

    /// A resource the command needs is busy; the command may succeed later.
    #[error("{0}")]
    Unavailable(String),

    /// The command was valid but executing it failed.
    #[error("{0}")]
    Failed(String),
}

impl From<RegistryError> for ActionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ResourceBusy { .. } => ActionError::Unavailable(err.to_string()),
            other => ActionError::Invalid(other.to_string()),
        }
    }
}

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dispatcher error: {0}")]
    Dispatcher(String),

    #[error("Undo failed: {0}")]
    Undo(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}
