//! Static per-kind command metadata.
//!
//! Every command kind carries a small TOML definition listing its parameters, their defaults and
//! the kind-level flags `undoable` / `changes_project_data`. The definition is parsed once per
//! kind and shared for the lifetime of the process.

use crate::error::ParseError;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Deserialize)]
struct ActionDefinition {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    undoable: bool,
    #[serde(default)]
    changes_project_data: bool,
    #[serde(default)]
    parameters: Vec<ParameterDefinition>,
}

#[derive(Debug, Deserialize)]
struct ParameterDefinition {
    name: String,
    #[serde(default)]
    default: Option<toml::Value>,
    #[serde(default)]
    description: String,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    /// Wire-format default; `None` makes the parameter a required argument
    pub default: Option<String>,
    pub description: String,
}

impl ParameterInfo {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Parsed command metadata
#[derive(Debug, Clone)]
pub struct ActionInfo {
    name: String,
    description: String,
    undoable: bool,
    changes_project_data: bool,
    parameters: Vec<ParameterInfo>,
    usage: String,
}

impl ActionInfo {
    /// Parse a TOML action definition.
    pub fn parse(definition: &str) -> Result<Self, ParseError> {
        let def: ActionDefinition = toml::from_str(definition)
            .map_err(|e| ParseError::InvalidDefinition(e.to_string()))?;

        if def.name.trim().is_empty() || def.name.contains(char::is_whitespace) {
            return Err(ParseError::InvalidDefinition(format!(
                "invalid action name '{}'",
                def.name
            )));
        }

        let mut seen = HashSet::new();
        let mut parameters = Vec::with_capacity(def.parameters.len());
        for param in def.parameters {
            let valid = !param.name.is_empty()
                && param
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(ParseError::InvalidDefinition(format!(
                    "{}: parameter name '{}' must be a lowercase identifier",
                    def.name, param.name
                )));
            }
            if !seen.insert(param.name.clone()) {
                return Err(ParseError::InvalidDefinition(format!(
                    "{}: duplicate parameter '{}'",
                    def.name, param.name
                )));
            }
            let default = match param.default {
                None => None,
                Some(toml::Value::String(s)) => Some(s),
                Some(toml::Value::Integer(i)) => Some(i.to_string()),
                Some(toml::Value::Float(f)) => Some(f.to_string()),
                Some(toml::Value::Boolean(b)) => Some(b.to_string()),
                Some(other) => {
                    return Err(ParseError::InvalidDefinition(format!(
                        "{}: unsupported default for '{}': {}",
                        def.name, param.name, other
                    )))
                }
            };
            parameters.push(ParameterInfo {
                name: param.name,
                default,
                description: param.description,
            });
        }

        let usage = build_usage(&def.name, &parameters);
        Ok(Self {
            name: def.name,
            description: def.description,
            undoable: def.undoable,
            changes_project_data: def.changes_project_data,
            parameters,
            usage,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Kind-level flag; distinct from the per-instance property set.
    pub fn is_undoable(&self) -> bool {
        self.undoable
    }

    pub fn changes_project_data(&self) -> bool {
        self.changes_project_data
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterInfo> {
        self.parameters.iter().find(|p| p.name == key)
    }

    pub fn key_index(&self, key: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == key)
    }

    /// Required keys in declaration order.
    pub fn arguments(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.parameters.iter().filter(|p| p.is_required())
    }

    /// `Kind key1=<key1> [key2=default]`
    pub fn usage(&self) -> &str {
        &self.usage
    }

    /// Reject unknown keys and report the first missing required key.
    pub fn check_keys<K: AsRef<str>>(&self, keys: &[K]) -> Result<(), ParseError> {
        for key in keys {
            if self.parameter(key.as_ref()).is_none() {
                return Err(ParseError::UnknownKey {
                    kind: self.name.clone(),
                    key: key.as_ref().to_string(),
                });
            }
        }
        for required in self.arguments() {
            if !keys.iter().any(|k| k.as_ref() == required.name) {
                return Err(ParseError::MissingKey {
                    key: required.name.clone(),
                    usage: self.usage.clone(),
                });
            }
        }
        Ok(())
    }
}

fn build_usage(name: &str, parameters: &[ParameterInfo]) -> String {
    let mut usage = name.to_string();
    for param in parameters {
        usage.push(' ');
        match &param.default {
            None => usage.push_str(&format!("{}=<{}>", param.name, param.name)),
            Some(default) => usage.push_str(&format!("[{}={}]", param.name, default)),
        }
    }
    usage
}

/// Parse a built-in definition once and hand out the shared copy.
///
/// # Panics
///
/// Panics if `definition` does not parse. Definitions are compile-time constants, so a failure
/// is a programming error in the command that owns it.
pub fn cached_info(cell: &'static OnceLock<Arc<ActionInfo>>, definition: &str) -> Arc<ActionInfo> {
    cell.get_or_init(|| match ActionInfo::parse(definition) {
        Ok(info) => Arc::new(info),
        Err(e) => panic!("invalid built-in action definition: {}", e),
    })
    .clone()
}
