//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("dispatcher.thread_name", "action-dispatch")?
        .set_default("dispatcher.worker_thread_prefix", "filter")?
        .set_default("registry.max_group_voxels", 1u64 << 30)?
        .set_default("undo.enabled", true)?
        .set_default("undo.max_items", 100)?
        .set_default("undo.memory_budget_bytes", 512u64 * 1024 * 1024)?
        .set_default("history.max_entries", 1000)
}
