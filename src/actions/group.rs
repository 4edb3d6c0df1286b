use crate::action::{cached_info, Action, ActionInfo, ActionResult, ActionScope, CommandProperties};
use crate::error::ActionError;
use std::sync::{Arc, OnceLock};
use tracing::info;

const DEFINITION: &str = r#"
name = "NewGroup"
description = "Create a group of resources sharing one volume size"

[[parameters]]
name = "nx"
description = "Voxels along x"

[[parameters]]
name = "ny"
description = "Voxels along y"

[[parameters]]
name = "nz"
description = "Voxels along z (number of slices)"

[[parameters]]
name = "name"
default = "Group"
"#;

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub name: String,
}

crate::action_parameters!(NewGroup { nx, ny, nz, name });

impl Action for NewGroup {
    fn info(&self) -> Arc<ActionInfo> {
        static INFO: OnceLock<Arc<ActionInfo>> = OnceLock::new();
        cached_info(&INFO, DEFINITION)
    }

    fn properties(&self) -> CommandProperties {
        CommandProperties::APPLICATION
    }

    fn validate(&mut self, scope: &ActionScope<'_>) -> Result<(), ActionError> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 {
            return Err(ActionError::Invalid(format!(
                "Group dimensions must be positive, got {}x{}x{}",
                self.nx, self.ny, self.nz
            )));
        }
        scope
            .engine
            .registry()
            .check_dimensions([self.nx, self.ny, self.nz])?;
        Ok(())
    }

    fn run(&mut self, scope: &ActionScope<'_>) -> Result<Option<ActionResult>, ActionError> {
        let id = scope
            .engine
            .registry()
            .create_group(&self.name, [self.nx, self.ny, self.nz])?;
        info!(group = %id, dims = ?[self.nx, self.ny, self.nz], "Group created");
        Ok(Some(ActionResult::Text(id)))
    }
}
