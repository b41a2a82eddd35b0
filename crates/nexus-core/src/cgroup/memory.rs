//! Memory resource control via cgroups v2.
//!
//! Manages `memory.max`.

use std::path::Path;

use super::write_cgroup_file;

/// File holding the hard memory limit.
pub const MEMORY_MAX: &str = "memory.max";

/// Sets the hard memory limit for a cgroup. `None` writes `max` (unlimited).
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: Option<u64>) -> std::io::Result<()> {
    let value = bytes.map_or_else(|| String::from("max"), |b| b.to_string());
    write_cgroup_file(&cgroup_path.join(MEMORY_MAX), &value)?;
    tracing::debug!(limit = %value, "memory max set");
    Ok(())
}
