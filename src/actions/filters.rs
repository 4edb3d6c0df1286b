//! Background filters.
//!
//! Both filters poll for abort once per z slice.

use crate::action::{
    cached_info, Action, ActionInfo, ActionResult, ActionScope, CommandProperties,
};
use crate::actions::{allocate_volume, provenance_step, require_available, resolve_active};
use crate::error::ActionError;
use crate::filter::ResourceLockingFilter;
use crate::registry::{Resource, ResourceKind};
use std::sync::{Arc, OnceLock};
use tracing::debug;

const THRESHOLD_DEFINITION: &str = r#"
name = "ThresholdFilter"
description = "Create a mask of the voxels whose value lies in [lower, upper]"
undoable = true
changes_project_data = true

[[parameters]]
name = "target"

[[parameters]]
name = "lower"
default = 0

[[parameters]]
name = "upper"
default = 255

[[parameters]]
name = "replace"
default = false
description = "Delete the source layer once the mask is installed"
"#;

const INVERT_DEFINITION: &str = r#"
name = "InvertFilter"
description = "Invert a data or mask layer"
undoable = true
changes_project_data = true

[[parameters]]
name = "target"

[[parameters]]
name = "replace"
default = false
description = "Write the result into the source layer"
"#;

/// Apply `f` slice by slice, giving up as soon as the filter is aborted.
fn map_slices(
    filter: &ResourceLockingFilter,
    source: &Resource,
    f: impl Fn(u8) -> u8,
) -> Result<Vec<u8>, ActionError> {
    let mut input = allocate_volume(source.byte_size())?;
    input.extend_from_slice(&source.data());
    let mut output = allocate_volume(input.len())?;
    for (index, slice) in input.chunks(source.slice_len().max(1)).enumerate() {
        if filter.check_abort() {
            debug!(filter = %filter.name(), slice = index, "Abort observed");
            return Err(ActionError::Failed("Aborted".to_string()));
        }
        output.extend(slice.iter().map(|&v| f(v)));
    }
    Ok(output)
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdFilter {
    pub target: String,
    pub lower: u32,
    pub upper: u32,
    pub replace: bool,
}

crate::action_parameters!(ThresholdFilter {
    target,
    lower,
    upper,
    replace
});

impl Action for ThresholdFilter {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, THRESHOLD_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::UNDOABLE | CommandProperties::ASYNCHRONOUS
    }

    fn translate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        resolve_active(scope, &mut self.target)
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        if self.upper > 255 || self.lower > self.upper {
            return Err(ActionError::Invalid(format!(
                "Invalid threshold range [{}, {}]",
                self.lower, self.upper
            )));
        }
        let source = scope.engine.registry().find(&self.target)?;
        require_available(scope, &source, false)
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let engine = scope.engine;
        let source = engine.registry().find(&self.target)?;
        let position = engine.registry().position_of(&source);

        let mut filter = ResourceLockingFilter::new(engine, &self.kind());
        filter.lock_for_use(&source)?;
        filter.connect_abort(&source);
        let mask = filter.create_and_lock_new(
            &source,
            ResourceKind::Mask,
            &format!("{} threshold", source.name()),
        )?;

        let mut item = filter.create_undo_item(&self.kind());
        let mut step = provenance_step(self)
            .with_inputs([source.provenance_id()])
            .with_outputs([mask.provenance_id()]);
        if self.replace {
            item.add_resource_to_add(Arc::clone(&source), position);
            step = step.with_replaced([source.provenance_id()]);
        }
        engine.record_undoable(scope, item, step);

        let (lower, upper, replace) = (self.lower as u8, self.upper as u8, self.replace);
        filter.start(Arc::clone(scope.context), move |filter| {
            let output = map_slices(filter, &source, |v| u8::from(v >= lower && v <= upper))?;
            filter.dispatch_insert_result(&mask, output)?;
            if replace {
                filter.dispatch_delete_resource(&source)?;
            }
            Ok(Some(ActionResult::Text(mask.id().to_string())))
        })?;
        Ok(None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvertFilter {
    pub target: String,
    pub replace: bool,
}

crate::action_parameters!(InvertFilter { target, replace });

impl Action for InvertFilter {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, INVERT_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::UNDOABLE | CommandProperties::ASYNCHRONOUS
    }

    fn translate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        resolve_active(scope, &mut self.target)
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        let source = scope.engine.registry().find(&self.target)?;
        require_available(scope, &source, self.replace)
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let engine = scope.engine;
        let source = engine.registry().find(&self.target)?;
        let mut filter = ResourceLockingFilter::new(engine, &self.kind());

        let (destination, step) = if self.replace {
            filter.lock_for_processing(&source, true)?;
            let (old, new) = filter
                .replacements()
                .last()
                .copied()
                .ok_or_else(|| ActionError::Failed("No provenance id assigned".to_string()))?;
            let step = provenance_step(self)
                .with_inputs([old])
                .with_outputs([new])
                .with_replaced([old]);
            (Arc::clone(&source), step)
        } else {
            filter.lock_for_use(&source)?;
            filter.connect_abort(&source);
            let output = filter.create_and_lock_new(
                &source,
                source.kind(),
                &format!("{} inverted", source.name()),
            )?;
            let step = provenance_step(self)
                .with_inputs([source.provenance_id()])
                .with_outputs([output.provenance_id()]);
            (output, step)
        };

        let item = filter.create_undo_item(&self.kind());
        engine.record_undoable(scope, item, step);

        let kind = source.kind();
        filter.start(Arc::clone(scope.context), move |filter| {
            let output = map_slices(filter, &source, |v| match kind {
                ResourceKind::Data => 255 - v,
                ResourceKind::Mask => u8::from(v == 0),
            })?;
            filter.dispatch_insert_result(&destination, output)?;
            Ok(Some(ActionResult::Text(destination.id().to_string())))
        })?;
        Ok(None)
    }
}
