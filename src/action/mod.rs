//! Command contract.
//!
//! A command is a struct whose fields are its parameters. [`ActionParameters`] (usually generated
//! by [`action_parameters!`](crate::action_parameters)) maps those fields to the string keys of the
//! wire format, and [`Action`] adds the lifecycle hooks the dispatcher calls:
//! `translate -> validate -> run`, followed by `clear_cache`.

pub mod context;
pub mod factory;
pub mod info;
pub mod params;

use crate::engine::Engine;
use crate::error::{ActionError, ParseError};
use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use context::{
    undo_context, ActionContext, ActionContextHandle, ActionSource, ActionStatus, BasicContext,
    ChildContext,
};
pub use factory::ActionFactory;
pub use info::{cached_info, ActionInfo, ParameterInfo};
pub use params::Parameter;

bitflags! {
    /// Static per-kind property set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandProperties: u32 {
        const APPLICATION = 1 << 0;
        const LAYER = 1 << 1;
        const INTERFACE = 1 << 2;
        const UNDOABLE = 1 << 3;
        const ASYNCHRONOUS = 1 << 4;
        const COLLAPSEABLE = 1 << 5;
        const QUERY = 1 << 6;
    }
}

/// Value a command hands back to its submitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ActionResult {
    Text(String),
    Ids(Vec<String>),
    Number(i64),
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionResult::Text(text) => f.write_str(text),
            ActionResult::Ids(ids) => write!(f, "[{}]", ids.join(", ")),
            ActionResult::Number(n) => write!(f, "{}", n),
        }
    }
}

/// String-keyed view over a command's typed fields.
pub trait ActionParameters {
    /// Parameters in declaration order.
    fn export_parameters(&self) -> Vec<(&'static str, String)>;

    /// Set one parameter from its wire value. `Ok(false)` means the key is not a parameter of
    /// this command.
    fn import_parameter(&mut self, key: &str, value: &str) -> Result<bool, String>;
}

/// Implement [`ActionParameters`] for a struct whose listed fields implement
/// [`Parameter`](crate::action::params::Parameter). Field names are the wire keys.
#[macro_export]
macro_rules! action_parameters {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::action::ActionParameters for $ty {
            fn export_parameters(&self) -> Vec<(&'static str, String)> {
                vec![$((
                    stringify!($field),
                    $crate::action::params::Parameter::export_value(&self.$field),
                )),*]
            }

            #[allow(unused_variables)]
            fn import_parameter(&mut self, key: &str, value: &str) -> Result<bool, String> {
                match key {
                    $(stringify!($field) => {
                        self.$field = $crate::action::params::Parameter::import_value(value)?;
                        Ok(true)
                    })*
                    _ => Ok(false),
                }
            }
        }
    };
}

/// Everything a command sees while it executes.
pub struct ActionScope<'a> {
    pub engine: &'a Arc<Engine>,
    pub context: &'a ActionContextHandle,
    /// Handle of the executing command; stored as the redo command of its undo item
    pub handle: &'a ActionHandle,
}

impl<'a> ActionScope<'a> {
    pub fn new(
        engine: &'a Arc<Engine>,
        context: &'a ActionContextHandle,
        handle: &'a ActionHandle,
    ) -> Self {
        Self {
            engine,
            context,
            handle,
        }
    }

    pub fn source(&self) -> ActionSource {
        self.context.source()
    }
}

/// One unit of state mutation.
///
/// `translate` and `validate` may rewrite the command's own parameters but must not touch shared
/// state. `run` performs the mutation. An asynchronous command returns from `run` after starting
/// its worker (or with an error); the worker completes the context later. The command object is
/// executed once, except for redo, which validates and runs the same object again.
pub trait Action: ActionParameters + Send + 'static {
    fn info(&self) -> Arc<ActionInfo>;

    fn properties(&self) -> CommandProperties;

    /// Late binding of parameters, such as resolving the active resource.
    fn translate(&mut self, _scope: &ActionScope<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn validate(&mut self, _scope: &ActionScope<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError>;

    /// Release anything cached during validate/run.
    fn clear_cache(&mut self) {}

    fn kind(&self) -> String {
        self.info().name().to_string()
    }

    fn is_undoable(&self) -> bool {
        self.properties().contains(CommandProperties::UNDOABLE)
    }

    fn is_asynchronous(&self) -> bool {
        self.properties().contains(CommandProperties::ASYNCHRONOUS)
    }

    /// `Kind key='value' ...`
    fn export_to_string(&self) -> String {
        let pairs = params::format_pairs(self.export_parameters());
        if pairs.is_empty() {
            self.kind()
        } else {
            format!("{} {}", self.kind(), pairs)
        }
    }

    /// Import parameters from a full command line or from bare `key='value'` pairs. Keys that
    /// are not given keep their current values.
    fn import_from_string(&mut self, text: &str) -> Result<(), ParseError> {
        let info = self.info();
        let trimmed = text.trim_start();
        let first_token_end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let pairs_text = if trimmed[..first_token_end].contains('=') || trimmed.is_empty() {
            trimmed
        } else {
            let (kind, rest) = params::split_kind(trimmed)?;
            if !kind.eq_ignore_ascii_case(info.name()) {
                return Err(ParseError::UnknownCommand(kind.to_string()));
            }
            rest
        };
        let pairs = params::scan_pairs(pairs_text)?;
        apply_pairs(self, &info, &pairs)
    }
}

/// Import scanned pairs, mapping failures to [`ParseError`].
pub(crate) fn apply_pairs<A: Action + ?Sized>(
    action: &mut A,
    info: &ActionInfo,
    pairs: &[(String, String)],
) -> Result<(), ParseError> {
    for (key, value) in pairs {
        match action.import_parameter(key, value) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ParseError::UnknownKey {
                    kind: info.name().to_string(),
                    key: key.clone(),
                })
            }
            Err(reason) => {
                return Err(ParseError::InvalidValue {
                    key: key.clone(),
                    value: value.clone(),
                    reason,
                })
            }
        }
    }
    Ok(())
}

/// Shared, lockable command object
pub type ActionHandle = Arc<Mutex<dyn Action>>;

pub fn action_handle<A: Action>(action: A) -> ActionHandle {
    Arc::new(Mutex::new(action))
}
