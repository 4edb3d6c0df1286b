//! Byte-level resource snapshots.

use crate::registry::Resource;
use crate::types::{ProvenanceId, ResourceId};

/// Immutable copy of one resource's data and provenance id. Consumed by [`Checkpoint::apply`].
#[derive(Debug)]
pub struct Checkpoint {
    resource_id: ResourceId,
    provenance_id: ProvenanceId,
    data: Vec<u8>,
}

impl Checkpoint {
    pub fn capture(resource: &Resource) -> Self {
        Self {
            resource_id: resource.id().to_string(),
            provenance_id: resource.provenance_id(),
            data: resource.data().clone(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn provenance_id(&self) -> ProvenanceId {
        self.provenance_id
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Overwrite `resource` with the snapshot. The caller guarantees no worker is writing it.
    pub fn apply(self, resource: &Resource) {
        resource.replace_data(self.data);
        resource.inner.lock().provenance_id = self.provenance_id;
    }
}
