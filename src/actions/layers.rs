//! Commands that add or remove layers.

use crate::action::{
    cached_info, Action, ActionInfo, ActionResult, ActionScope, CommandProperties,
};
use crate::actions::{allocate_volume, provenance_step, resolve_active};
use crate::error::ActionError;
use crate::registry::{ResourceKind, ResourceState};
use crate::undo::UndoItem;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

const DATA_LAYER_DEFINITION: &str = r#"
name = "NewDataLayer"
description = "Add a data layer filled with deterministic pseudo-random values"
undoable = true
changes_project_data = true

[[parameters]]
name = "group_id"

[[parameters]]
name = "name"
default = "Data"

[[parameters]]
name = "seed"
default = 1
"#;

const MASK_LAYER_DEFINITION: &str = r#"
name = "NewMaskLayer"
description = "Add an empty mask layer"
undoable = true
changes_project_data = true

[[parameters]]
name = "group_id"

[[parameters]]
name = "name"
default = "Mask"
"#;

const DELETE_LAYERS_DEFINITION: &str = r#"
name = "DeleteLayers"
description = "Delete layers; undo puts them back where they were"
undoable = true
changes_project_data = true

[[parameters]]
name = "layers"
description = "Layer ids, e.g. [layer_0,layer_2]"
"#;

/// xorshift64 byte stream. A zero seed is remapped since it would only produce zeros.
pub(crate) fn pseudo_random_fill(len: usize, seed: u64) -> Result<Vec<u8>, ActionError> {
    let mut state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
    let mut volume = allocate_volume(len)?;
    volume.extend((0..len).map(|_| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 56) as u8
    }));
    Ok(volume)
}

fn create_layer(
    scope: &ActionScope<'_>,
    action: &dyn Action,
    group_id: &str,
    kind: ResourceKind,
    name: &str,
    fill: impl FnOnce(usize) -> Result<Vec<u8>, ActionError>,
) -> Result<Option<ActionResult>, ActionError> {
    let engine = scope.engine;
    let registry = engine.registry();
    let counters = registry.counter_state();
    let previous_active = registry.active_resource();
    let dims = registry.group_dims(group_id)?;
    let layer = registry.create_resource(group_id, kind, name, fill(dims.iter().product())?)?;
    registry.set_active_resource(Some(layer.id()))?;
    info!(layer = %layer.id(), group = %group_id, %kind, "Layer created");

    let mut item = UndoItem::new(&action.kind(), counters);
    item.set_active_to_restore(previous_active);
    item.add_resource_to_delete(Arc::clone(&layer));
    let step = provenance_step(action).with_outputs([layer.provenance_id()]);
    engine.record_undoable(scope, item, step);
    Ok(Some(ActionResult::Text(layer.id().to_string())))
}

#[derive(Debug, Clone, Default)]
pub struct NewDataLayer {
    pub group_id: String,
    pub name: String,
    pub seed: u64,
}

crate::action_parameters!(NewDataLayer {
    group_id,
    name,
    seed
});

impl Action for NewDataLayer {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, DATA_LAYER_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::UNDOABLE
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        scope.engine.registry().group_dims(&self.group_id)?;
        Ok(())
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let seed = self.seed;
        create_layer(scope, &*self, &self.group_id, ResourceKind::Data, &self.name, |len| {
            pseudo_random_fill(len, seed)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewMaskLayer {
    pub group_id: String,
    pub name: String,
}

crate::action_parameters!(NewMaskLayer { group_id, name });

impl Action for NewMaskLayer {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, MASK_LAYER_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::UNDOABLE
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        scope.engine.registry().group_dims(&self.group_id)?;
        Ok(())
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        create_layer(scope, &*self, &self.group_id, ResourceKind::Mask, &self.name, |len| {
            let mut volume = allocate_volume(len)?;
            volume.resize(len, 0);
            Ok(volume)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteLayers {
    pub layers: Vec<String>,
}

crate::action_parameters!(DeleteLayers { layers });

impl Action for DeleteLayers {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, DELETE_LAYERS_DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::LAYER | CommandProperties::UNDOABLE
    }

    fn translate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        for layer in &mut self.layers {
            resolve_active(scope, layer)?;
        }
        Ok(())
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        if self.layers.is_empty() {
            return Err(ActionError::Invalid("No layers to delete".to_string()));
        }
        let registry = scope.engine.registry();
        for (index, layer) in self.layers.iter().enumerate() {
            let resource = registry.find(layer)?;
            if self.layers[..index].contains(layer) {
                return Err(ActionError::Invalid(format!("Layer '{}' listed twice", layer)));
            }
            // Nothing to put back on undo until its data exists.
            if resource.state() == ResourceState::Creating {
                scope.context.report_need_resource(layer);
                return Err(ActionError::Unavailable(format!(
                    "Layer '{}' is still being created",
                    layer
                )));
            }
        }
        Ok(())
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let engine = scope.engine;
        let registry = engine.registry();
        let mut item = UndoItem::new(&self.kind(), registry.counter_state());
        item.set_active_to_restore(registry.active_resource());
        let mut inputs = Vec::with_capacity(self.layers.len());

        for id in &self.layers {
            let layer = registry.find(id)?;
            for filter in engine.filters().referencing(&layer) {
                debug!(layer = %id, filter = %filter.name(), "Aborting filter using deleted layer");
                filter.raise_abort();
            }
            let position = registry.delete(&layer);
            inputs.push(layer.provenance_id());
            item.add_resource_to_add(layer, position);
        }
        info!(layers = ?self.layers, "Layers deleted");

        let step = provenance_step(self).with_inputs(inputs);
        engine.record_undoable(scope, item, step);
        Ok(Some(ActionResult::Ids(self.layers.clone())))
    }
}
