//! Command factory for the script front-end.
//!
//! Maps a case-insensitive kind name to a constructor. A command line is checked against the
//! kind's [`ActionInfo`] before any command object is built, so a script that omits a required
//! key gets the usage string back instead of a half-initialised command.

use crate::action::info::ActionInfo;
use crate::action::{action_handle, apply_pairs, params, Action, ActionHandle};
use crate::error::ParseError;
use std::collections::BTreeMap;
use std::sync::Arc;

type Constructor = Box<dyn Fn(&[(String, String)]) -> Result<ActionHandle, ParseError> + Send + Sync>;

struct FactoryEntry {
    info: Arc<ActionInfo>,
    construct: Constructor,
}

/// Registry of constructible command kinds
#[derive(Default)]
pub struct ActionFactory {
    entries: BTreeMap<String, FactoryEntry>,
}

impl ActionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command kind. A later registration of the same kind replaces the earlier one.
    pub fn register<A: Action + Default>(&mut self) {
        let info = A::default().info();
        let entry_info = Arc::clone(&info);
        let construct: Constructor = Box::new(move |pairs| {
            let mut action = A::default();
            for param in entry_info.parameters() {
                if let Some(default) = &param.default {
                    if !pairs.iter().any(|(key, _)| key == &param.name) {
                        apply_pairs(
                            &mut action,
                            &entry_info,
                            &[(param.name.clone(), default.clone())],
                        )?;
                    }
                }
            }
            apply_pairs(&mut action, &entry_info, pairs)?;
            Ok(action_handle(action))
        });
        self.entries.insert(
            info.name().to_ascii_lowercase(),
            FactoryEntry { info, construct },
        );
    }

    /// Build a command from `Kind key='value' ...`.
    pub fn create(&self, line: &str) -> Result<ActionHandle, ParseError> {
        let (kind, rest) = params::split_kind(line)?;
        let entry = self
            .entries
            .get(&kind.to_ascii_lowercase())
            .ok_or_else(|| ParseError::UnknownCommand(kind.to_string()))?;
        let pairs = params::scan_pairs(rest)?;
        let keys: Vec<&str> = pairs.iter().map(|(key, _)| key.as_str()).collect();
        entry.info.check_keys(&keys)?;
        (entry.construct)(&pairs)
    }

    pub fn info_for(&self, kind: &str) -> Option<Arc<ActionInfo>> {
        self.entries
            .get(&kind.to_ascii_lowercase())
            .map(|entry| Arc::clone(&entry.info))
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|entry| entry.info.name().to_string())
            .collect()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(&kind.to_ascii_lowercase())
    }
}
