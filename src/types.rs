//! Core identifier types shared across the engine.

/// Identifier of a resource (layer) in the registry, e.g. `layer_3`.
pub type ResourceId = String;

/// Identifier of a resource group, e.g. `group_0`.
pub type GroupId = String;

/// Causal identifier attached to every resource state. Allocated from the registry counters.
pub type ProvenanceId = i64;

/// Identifier of a recorded provenance step.
pub type ProvenanceStepId = i64;

/// Key identifying the filter that holds a resource lock.
pub type FilterKey = u64;

/// Provenance id of a resource that has not been produced by any step yet.
pub const INVALID_PROVENANCE_ID: ProvenanceId = -1;
