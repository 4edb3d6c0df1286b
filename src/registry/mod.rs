//! Resource registry.
//!
//! Groups of fixed-size u8 volumes, each group holding an ordered list of resources. The registry
//! owns the monotonic id counters that undo rolls back, and the per-resource shared/exclusive
//! lock state used by background filters. Lock requests never block: a conflict is reported as
//! [`RegistryError::ResourceBusy`].

pub mod checkpoint;
pub mod resource;

pub use checkpoint::Checkpoint;
pub use resource::{Resource, ResourceKind, ResourceState};

use crate::error::RegistryError;
use crate::types::{FilterKey, GroupId, ProvenanceId, ResourceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Id allocation counters captured by undo items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterState {
    pub next_resource: u64,
    pub next_provenance: ProvenanceId,
}

#[derive(Debug, Clone)]
struct Group {
    id: GroupId,
    name: String,
    dims: [usize; 3],
    members: Vec<ResourceId>,
}

#[derive(Default)]
struct RegistryInner {
    groups: Vec<Group>,
    resources: HashMap<ResourceId, Arc<Resource>>,
    counters: CounterState,
    next_group: u64,
    active: Option<ResourceId>,
}

impl RegistryInner {
    fn group(&self, id: &str) -> Result<&Group, RegistryError> {
        self.groups
            .iter()
            .find(|g| g.id == id)
            .ok_or_else(|| RegistryError::GroupNotFound(id.to_string()))
    }

    fn group_mut(&mut self, id: &str) -> Result<&mut Group, RegistryError> {
        self.groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| RegistryError::GroupNotFound(id.to_string()))
    }

    fn is_registered(&self, resource: &Arc<Resource>) -> bool {
        self.resources
            .get(resource.id())
            .map(|r| Arc::ptr_eq(r, resource))
            .unwrap_or(false)
    }

    fn allocate_resource_id(&mut self) -> ResourceId {
        let id = format!("layer_{}", self.counters.next_resource);
        self.counters.next_resource += 1;
        id
    }

    fn allocate_provenance_id(&mut self) -> ProvenanceId {
        let id = self.counters.next_provenance;
        self.counters.next_provenance += 1;
        id
    }
}

pub struct ResourceRegistry {
    inner: RwLock<RegistryInner>,
    max_group_voxels: u64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::with_max_group_voxels(crate::config::RegistryConfig::default().max_group_voxels)
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_group_voxels(max_group_voxels: u64) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_group_voxels,
        }
    }

    /// Voxel count of a group with `dims`. Zero extents, overflow and volumes above the
    /// configured maximum are rejected.
    pub fn check_dimensions(&self, dims: [usize; 3]) -> Result<usize, RegistryError> {
        let shown = || format!("{}x{}x{}", dims[0], dims[1], dims[2]);
        if dims.iter().any(|&d| d == 0) {
            return Err(RegistryError::InvalidDimensions(shown()));
        }
        dims.iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|&count| count as u64 <= self.max_group_voxels)
            .ok_or_else(|| {
                RegistryError::InvalidDimensions(format!(
                    "{} exceeds the limit of {} voxels",
                    shown(),
                    self.max_group_voxels
                ))
            })
    }

    pub fn create_group(&self, name: &str, dims: [usize; 3]) -> Result<GroupId, RegistryError> {
        self.check_dimensions(dims)?;
        let mut inner = self.inner.write();
        let id = format!("group_{}", inner.next_group);
        inner.next_group += 1;
        inner.groups.push(Group {
            id: id.clone(),
            name: name.to_string(),
            dims,
            members: Vec::new(),
        });
        debug!(group = %id, ?dims, "Group created");
        Ok(id)
    }

    pub fn group_dims(&self, group: &str) -> Result<[usize; 3], RegistryError> {
        Ok(self.inner.read().group(group)?.dims)
    }

    pub fn group_members(&self, group: &str) -> Result<Vec<ResourceId>, RegistryError> {
        Ok(self.inner.read().group(group)?.members.clone())
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.inner.read().groups.iter().map(|g| g.id.clone()).collect()
    }

    pub fn find(&self, id: &str) -> Result<Arc<Resource>, RegistryError> {
        self.inner
            .read()
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::ResourceNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().resources.contains_key(id)
    }

    pub fn is_registered(&self, resource: &Arc<Resource>) -> bool {
        self.inner.read().is_registered(resource)
    }

    pub fn resource_count(&self) -> usize {
        self.inner.read().resources.len()
    }

    /// Register a new, available resource holding `data`.
    pub fn create_resource(
        &self,
        group: &str,
        kind: ResourceKind,
        name: &str,
        data: Vec<u8>,
    ) -> Result<Arc<Resource>, RegistryError> {
        let mut inner = self.inner.write();
        let dims = inner.group(group)?.dims;
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(RegistryError::SizeMismatch {
                id: name.to_string(),
                expected,
                actual: data.len(),
            });
        }
        let id = inner.allocate_resource_id();
        let provenance_id = inner.allocate_provenance_id();
        let resource = Arc::new(Resource::new(
            id.clone(),
            name.to_string(),
            kind,
            group.to_string(),
            dims,
            ResourceState::Available,
            provenance_id,
            data,
        ));
        inner.group_mut(group)?.members.push(id.clone());
        inner.resources.insert(id, Arc::clone(&resource));
        Ok(resource)
    }

    /// Register an empty resource in state `Creating`, exclusively locked by `key`.
    pub fn create_and_lock(
        &self,
        group: &str,
        kind: ResourceKind,
        name: &str,
        key: FilterKey,
    ) -> Result<Arc<Resource>, RegistryError> {
        let mut inner = self.inner.write();
        let dims = inner.group(group)?.dims;
        let id = inner.allocate_resource_id();
        let provenance_id = inner.allocate_provenance_id();
        let resource = Arc::new(Resource::new(
            id.clone(),
            name.to_string(),
            kind,
            group.to_string(),
            dims,
            ResourceState::Creating,
            provenance_id,
            Vec::new(),
        ));
        resource.inner.lock().users.push(key);
        inner.group_mut(group)?.members.push(id.clone());
        inner.resources.insert(id, Arc::clone(&resource));
        Ok(resource)
    }

    pub fn insert(&self, resource: Arc<Resource>) -> Result<(), RegistryError> {
        self.insert_at(resource, None)
    }

    /// Insert at `position` inside the resource's group (appended when `None` or out of range).
    /// Inserting the very resource that is already registered is a no-op.
    pub fn insert_at(
        &self,
        resource: Arc<Resource>,
        position: Option<usize>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.resources.get(resource.id()) {
            if Arc::ptr_eq(existing, &resource) {
                return Ok(());
            }
            return Err(RegistryError::AlreadyExists(resource.id().to_string()));
        }
        let group = inner.group_mut(resource.group())?;
        let index = position
            .filter(|&p| p <= group.members.len())
            .unwrap_or(group.members.len());
        group.members.insert(index, resource.id().to_string());
        inner
            .resources
            .insert(resource.id().to_string(), resource);
        Ok(())
    }

    pub fn position_of(&self, resource: &Resource) -> Option<usize> {
        let inner = self.inner.read();
        inner
            .group(resource.group())
            .ok()?
            .members
            .iter()
            .position(|id| id == resource.id())
    }

    /// Remove `resource` from the registry; returns its former position in its group.
    /// Deleting a resource that is not registered is tolerated and returns `None`.
    pub fn delete(&self, resource: &Arc<Resource>) -> Option<usize> {
        let mut inner = self.inner.write();
        if !inner.is_registered(resource) {
            return None;
        }
        inner.resources.remove(resource.id());
        if inner.active.as_deref() == Some(resource.id()) {
            inner.active = None;
        }
        let group = inner.group_mut(resource.group()).ok()?;
        let position = group.members.iter().position(|id| id == resource.id())?;
        group.members.remove(position);
        debug!(resource = %resource.id(), position, "Resource deleted");
        Some(position)
    }

    /// Delete a resource locked by `key` and release the lock.
    pub fn delete_locked(
        &self,
        resource: &Arc<Resource>,
        key: FilterKey,
    ) -> Result<Option<usize>, RegistryError> {
        self.release(resource, key)?;
        Ok(self.delete(resource))
    }

    /// Shared lock. Fails if the resource is being created or processed.
    pub fn lock_for_use(&self, resource: &Arc<Resource>, key: FilterKey) -> Result<(), RegistryError> {
        self.ensure_registered(resource)?;
        let mut state = resource.inner.lock();
        match state.state {
            ResourceState::Available | ResourceState::InUse => {
                state.state = ResourceState::InUse;
                state.users.push(key);
                Ok(())
            }
            other => Err(RegistryError::ResourceBusy {
                id: resource.id().to_string(),
                state: other.to_string(),
            }),
        }
    }

    /// Exclusive lock. Fails if any other lock is held.
    pub fn lock_for_processing(
        &self,
        resource: &Arc<Resource>,
        key: FilterKey,
    ) -> Result<(), RegistryError> {
        self.ensure_registered(resource)?;
        let mut state = resource.inner.lock();
        if state.state != ResourceState::Available {
            return Err(RegistryError::ResourceBusy {
                id: resource.id().to_string(),
                state: state.state.to_string(),
            });
        }
        state.state = ResourceState::Processing;
        state.users = vec![key];
        Ok(())
    }

    /// Release the lock held by `key`.
    pub fn unlock(&self, resource: &Arc<Resource>, key: FilterKey) -> Result<(), RegistryError> {
        self.release(resource, key)
    }

    fn release(&self, resource: &Resource, key: FilterKey) -> Result<(), RegistryError> {
        let mut state = resource.inner.lock();
        let index = state
            .users
            .iter()
            .position(|&k| k == key)
            .ok_or_else(|| RegistryError::KeyMismatch {
                id: resource.id().to_string(),
                key,
            })?;
        state.users.remove(index);
        if state.users.is_empty() {
            state.state = ResourceState::Available;
        }
        Ok(())
    }

    /// Install computed data into a resource the filter `key` holds exclusively. Rejected when the
    /// resource has been unregistered or the lock has moved on.
    pub fn install_data(
        &self,
        resource: &Arc<Resource>,
        data: Vec<u8>,
        key: FilterKey,
    ) -> Result<(), RegistryError> {
        self.ensure_registered(resource)?;
        {
            let state = resource.inner.lock();
            let exclusive = matches!(
                state.state,
                ResourceState::Creating | ResourceState::Processing
            );
            if !exclusive || !state.users.contains(&key) {
                return Err(RegistryError::KeyMismatch {
                    id: resource.id().to_string(),
                    key,
                });
            }
        }
        if data.len() != resource.voxel_count() {
            return Err(RegistryError::SizeMismatch {
                id: resource.id().to_string(),
                expected: resource.voxel_count(),
                actual: data.len(),
            });
        }
        resource.replace_data(data);
        Ok(())
    }

    /// Give a resource a fresh provenance id; returns `(old, new)`.
    pub fn assign_provenance(&self, resource: &Resource) -> (ProvenanceId, ProvenanceId) {
        let new_id = self.inner.write().allocate_provenance_id();
        let mut state = resource.inner.lock();
        let old_id = state.provenance_id;
        state.provenance_id = new_id;
        (old_id, new_id)
    }

    pub fn counter_state(&self) -> CounterState {
        self.inner.read().counters
    }

    pub fn set_counter_state(&self, counters: CounterState) {
        self.inner.write().counters = counters;
    }

    pub fn active_resource(&self) -> Option<ResourceId> {
        self.inner.read().active.clone()
    }

    pub fn set_active_resource(&self, id: Option<&str>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if let Some(id) = id {
            if !inner.resources.contains_key(id) {
                return Err(RegistryError::ResourceNotFound(id.to_string()));
            }
        }
        inner.active = id.map(str::to_string);
        Ok(())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        let groups = inner
            .groups
            .iter()
            .map(|group| GroupSnapshot {
                id: group.id.clone(),
                name: group.name.clone(),
                dims: group.dims,
                resources: group
                    .members
                    .iter()
                    .filter_map(|id| inner.resources.get(id))
                    .map(|r| ResourceSnapshot {
                        id: r.id().to_string(),
                        name: r.name().to_string(),
                        kind: r.kind(),
                        state: r.state(),
                        generation: r.generation(),
                        provenance_id: r.provenance_id(),
                        content_hash: r.content_hash(),
                    })
                    .collect(),
            })
            .collect();
        RegistrySnapshot {
            groups,
            counters: inner.counters,
            active: inner.active.clone(),
        }
    }

    fn ensure_registered(&self, resource: &Arc<Resource>) -> Result<(), RegistryError> {
        if self.is_registered(resource) {
            Ok(())
        } else {
            Err(RegistryError::ResourceNotFound(resource.id().to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub generation: u64,
    pub provenance_id: ProvenanceId,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub name: String,
    pub dims: [usize; 3],
    pub resources: Vec<ResourceSnapshot>,
}

/// Point-in-time view of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub groups: Vec<GroupSnapshot>,
    pub counters: CounterState,
    pub active: Option<ResourceId>,
}

impl RegistrySnapshot {
    /// Equal ids, order, bytes, provenance ids, counters and active resource. Generations are
    /// ignored since every restore bumps them.
    pub fn same_content(&self, other: &RegistrySnapshot) -> bool {
        let strip = |s: &RegistrySnapshot| {
            s.groups
                .iter()
                .map(|g| {
                    let resources: Vec<_> = g
                        .resources
                        .iter()
                        .map(|r| {
                            (
                                r.id.clone(),
                                r.kind,
                                r.provenance_id,
                                r.content_hash.clone(),
                            )
                        })
                        .collect();
                    (g.id.clone(), resources)
                })
                .collect::<Vec<_>>()
        };
        self.counters == other.counters
            && self.active == other.active
            && strip(self) == strip(other)
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.groups
            .iter()
            .flat_map(|g| g.resources.iter().map(|r| r.id.clone()))
            .collect()
    }
}
