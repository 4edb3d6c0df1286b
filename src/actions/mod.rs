//! Built-in commands.
//!
//! Layer-creating and layer-deleting commands run synchronously on the serialization thread;
//! filters lock their inputs, create their outputs and record their undo item in `run`, then
//! hand the computation to a worker thread.

pub mod edit;
pub mod filters;
pub mod group;
pub mod layers;

pub use edit::{Redo, Undo};
pub use filters::{InvertFilter, ThresholdFilter};
pub use group::NewGroup;
pub use layers::{DeleteLayers, NewDataLayer, NewMaskLayer};

use crate::action::{params, Action, ActionContext, ActionFactory, ActionScope};
use crate::error::ActionError;
use crate::provenance::ProvenanceStep;
use crate::registry::Resource;

/// Parameter value that names the registry's active resource.
pub const ACTIVE_RESOURCE: &str = "<active>";

pub fn register_builtins(factory: &mut ActionFactory) {
    factory.register::<NewGroup>();
    factory.register::<NewDataLayer>();
    factory.register::<NewMaskLayer>();
    factory.register::<DeleteLayers>();
    factory.register::<ThresholdFilter>();
    factory.register::<InvertFilter>();
    factory.register::<Undo>();
    factory.register::<Redo>();
}

/// Replace [`ACTIVE_RESOURCE`] with the id of the active resource.
pub(crate) fn resolve_active(scope: &ActionScope<'_>, id: &mut String) -> Result<(), ActionError> {
    if id != ACTIVE_RESOURCE {
        return Ok(());
    }
    match scope.engine.registry().active_resource() {
        Some(active) => {
            *id = active;
            Ok(())
        }
        None => Err(ActionError::Invalid("No active resource".to_string())),
    }
}

/// Empty buffer with room for `len` voxels. Allocation failure is reported instead of aborting.
pub(crate) fn allocate_volume(len: usize) -> Result<Vec<u8>, ActionError> {
    let mut volume = Vec::new();
    volume
        .try_reserve_exact(len)
        .map_err(|e| ActionError::Failed(format!("Cannot allocate {} voxels: {}", len, e)))?;
    Ok(volume)
}

/// Fail with `Unavailable` and record the resource on the context if it is locked in a way
/// that excludes the requested access.
pub(crate) fn require_available(
    scope: &ActionScope<'_>,
    resource: &Resource,
    exclusive: bool,
) -> Result<(), ActionError> {
    let state = resource.state();
    let busy = if exclusive {
        state.is_busy_for_writing()
    } else {
        state.is_mid_computation()
    };
    if busy {
        scope.context.report_need_resource(resource.id());
        return Err(ActionError::Unavailable(format!(
            "Resource '{}' is {}",
            resource.id(),
            state
        )));
    }
    Ok(())
}

/// Provenance step carrying the command's kind and wire-format parameters.
pub(crate) fn provenance_step<A: Action + ?Sized>(action: &A) -> ProvenanceStep {
    ProvenanceStep::new(
        &action.kind(),
        &params::format_pairs(action.export_parameters()),
    )
}
