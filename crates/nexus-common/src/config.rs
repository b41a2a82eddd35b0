//! Configuration models for the Nexus runtime and orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Configuration for the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one state subdirectory per node.
    pub state_root: PathBuf,
    /// Parent cgroup under which node cgroups are created.
    pub cgroup_root: PathBuf,
    /// Binary re-executed as the init stage. `None` means the current executable.
    pub init_binary: Option<PathBuf>,
    /// Grace period between SIGTERM and SIGKILL, in milliseconds.
    pub stop_timeout_ms: u64,
    /// Time to wait for the init stage to report back, in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl RuntimeConfig {
    /// Returns the stop grace period.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Returns the init handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_root: PathBuf::from(constants::DEFAULT_STATE_ROOT),
            cgroup_root: PathBuf::from(constants::DEFAULT_CGROUP_ROOT),
            init_binary: None,
            stop_timeout_ms: constants::DEFAULT_STOP_TIMEOUT_MS,
            handshake_timeout_ms: constants::DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

/// Defaults the orchestrator applies when a request omits them.
///
/// A single-image deployment model: every node boots the same rootfs unless
/// the caller says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDefaults {
    /// Root filesystem for nodes that do not name one.
    pub rootfs: PathBuf,
    /// Command for nodes that do not name one.
    pub command: Vec<String>,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            rootfs: PathBuf::from(constants::DEFAULT_ROOTFS),
            command: constants::DEFAULT_COMMAND
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_runtime_config_fills_defaults() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{ "state_root": "/tmp/nexus-state" }"#).unwrap();
        assert_eq!(cfg.state_root, PathBuf::from("/tmp/nexus-state"));
        assert_eq!(cfg.cgroup_root, PathBuf::from(constants::DEFAULT_CGROUP_ROOT));
        assert_eq!(cfg.stop_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn default_command_is_long_running_placeholder() {
        let defaults = NodeDefaults::default();
        assert_eq!(defaults.command, vec!["/bin/sh", "-c", "sleep 3600"]);
        assert_eq!(defaults.rootfs, PathBuf::from("/var/lib/nexus/images/alpine-base"));
    }
}
