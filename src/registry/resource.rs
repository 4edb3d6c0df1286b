//! Resources (layers) and their lock state.

use crate::filter::FilterHandle;
use crate::types::{FilterKey, GroupId, ProvenanceId, ResourceId};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Arbitrary u8 voxel values
    Data,
    /// Voxel values 0 or 1
    Mask,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Data => f.write_str("data"),
            ResourceKind::Mask => f.write_str("mask"),
        }
    }
}

/// Lock state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Available,
    /// Created by a filter that has not installed data yet; exclusive
    Creating,
    /// Locked for exclusive writing
    Processing,
    /// Shared read locks held
    InUse,
}

impl ResourceState {
    pub fn is_busy_for_writing(self) -> bool {
        !matches!(self, ResourceState::Available)
    }

    pub fn is_mid_computation(self) -> bool {
        matches!(self, ResourceState::Creating | ResourceState::Processing)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Available => "available",
            ResourceState::Creating => "creating",
            ResourceState::Processing => "processing",
            ResourceState::InUse => "in use",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub(crate) struct ResourceInner {
    pub(crate) state: ResourceState,
    /// Keys of the filters holding a lock
    pub(crate) users: Vec<FilterKey>,
    pub(crate) generation: u64,
    pub(crate) provenance_id: ProvenanceId,
    /// Filters whose abort flag follows this resource's abort signal
    pub(crate) abort_subscribers: Vec<FilterHandle>,
}

/// A named unit of shared state: a u8 voxel volume inside a group.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    name: String,
    kind: ResourceKind,
    group: GroupId,
    dims: [usize; 3],
    pub(crate) inner: Mutex<ResourceInner>,
    data: RwLock<Vec<u8>>,
}

impl Resource {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ResourceId,
        name: String,
        kind: ResourceKind,
        group: GroupId,
        dims: [usize; 3],
        state: ResourceState,
        provenance_id: ProvenanceId,
        data: Vec<u8>,
    ) -> Self {
        let generation = if data.is_empty() { 0 } else { 1 };
        Self {
            id,
            name,
            kind,
            group,
            dims,
            inner: Mutex::new(ResourceInner {
                state,
                users: Vec::new(),
                generation,
                provenance_id,
                abort_subscribers: Vec::new(),
            }),
            data: RwLock::new(data),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Bytes in one z slice
    pub fn slice_len(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn state(&self) -> ResourceState {
        self.inner.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn provenance_id(&self) -> ProvenanceId {
        self.inner.lock().provenance_id
    }

    /// Keys of the filters currently holding a lock
    pub fn lock_holders(&self) -> Vec<FilterKey> {
        self.inner.lock().users.clone()
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    pub fn byte_size(&self) -> usize {
        self.data.read().len()
    }

    pub fn has_valid_data(&self) -> bool {
        self.data.read().len() == self.voxel_count()
    }

    /// blake3 digest of the voxel data, hex encoded
    pub fn content_hash(&self) -> String {
        hex::encode(blake3::hash(&self.data.read()).as_bytes())
    }

    /// Replace the data and bump the generation.
    pub(crate) fn replace_data(&self, data: Vec<u8>) {
        *self.data.write() = data;
        self.inner.lock().generation += 1;
    }

    pub(crate) fn subscribe_abort(&self, filter: FilterHandle) {
        let mut inner = self.inner.lock();
        if !inner.abort_subscribers.contains(&filter) {
            inner.abort_subscribers.push(filter);
        }
    }

    pub(crate) fn unsubscribe_abort(&self, filter: FilterHandle) {
        self.inner.lock().abort_subscribers.retain(|&h| h != filter);
    }

    pub(crate) fn abort_subscribers(&self) -> Vec<FilterHandle> {
        self.inner.lock().abort_subscribers.clone()
    }
}
