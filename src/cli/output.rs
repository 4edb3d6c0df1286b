//! CLI output: error mapping from engine errors to stable CLI surface.

use crate::error::EngineError;

/// Map engine errors to a string for CLI output.
pub fn map_error(e: &EngineError) -> String {
    match e {
        EngineError::Parse(parse) => format!("Invalid command: {}", parse),
        EngineError::ConfigError(message) => format!("Configuration error: {}", message),
        other => other.to_string(),
    }
}
