//! Undo and Redo as ordinary commands, so they queue behind everything posted before them.

use crate::action::{cached_info, Action, ActionInfo, ActionResult, ActionScope, CommandProperties};
use crate::error::ActionError;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Default)]
pub struct Undo;

crate::action_parameters!(Undo {});

impl Action for Undo {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, "name = \"Undo\"\ndescription = \"Undo the last command\"\n")
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::APPLICATION
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        if !scope.engine.undo_buffer().has_undo() {
            return Err(ActionError::Invalid("Nothing to undo".to_string()));
        }
        Ok(())
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let buffer = scope.engine.undo_buffer();
        let tag = buffer.undo_tag(0).unwrap_or_default();
        buffer
            .undo(scope.engine)
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(Some(ActionResult::Text(tag)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Redo;

crate::action_parameters!(Redo {});

impl Action for Redo {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, "name = \"Redo\"\ndescription = \"Redo the last undone command\"\n")
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::APPLICATION
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        if !scope.engine.undo_buffer().has_redo() {
            return Err(ActionError::Invalid("Nothing to redo".to_string()));
        }
        Ok(())
    }

    /// An asynchronous command being redone completes on its own replay context, which reports
    /// into this command's context.
    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let buffer = scope.engine.undo_buffer();
        let tag = buffer.redo_tag(0).unwrap_or_default();
        buffer
            .redo(scope.engine, scope.context)
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(Some(ActionResult::Text(tag)))
    }
}
