//! Domain types describing a node and its lifecycle.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{HOST_NAME_MAX, NODE_ID_MAX};
use crate::error::{NexusError, Result};

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Unique identifier for a node.
///
/// Doubles as the cgroup leaf name and the state directory name, so it is
/// restricted to characters that are safe as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID, rejecting values that are not path-safe.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the ID is empty, too long, starts with
    /// `.`, or contains characters other than ASCII alphanumerics, `-`, `_`, `.`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(NexusError::validation("node ID must not be empty"));
        }
        if id.len() > NODE_ID_MAX {
            return Err(NexusError::validation(format!(
                "node ID is {} bytes, limit is {NODE_ID_MAX}",
                id.len()
            )));
        }
        if id.starts_with('.') {
            return Err(NexusError::validation(format!(
                "node ID {id:?} must not start with '.'"
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(NexusError::validation(format!(
                "node ID {id:?} contains invalid character {c:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = NexusError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource limits for a node's cgroup. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// CPU shares (relative weight, cgroup v1 units).
    pub cpu_shares: Option<u64>,
}

/// Immutable creation request for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier.
    pub id: NodeId,
    /// Hostname set inside the UTS namespace.
    pub hostname: String,
    /// Memory budget in megabytes. Zero or negative means no limit.
    pub memory_mb: i64,
    /// Relative CPU weight. Zero means the kernel default.
    pub cpu_shares: u64,
    /// Absolute path to a prepared root filesystem.
    pub rootfs_path: PathBuf,
    /// argv of the node process; the first element is the executable.
    pub command: Vec<String>,
}

impl NodeConfig {
    /// Checks every field without touching the kernel.
    ///
    /// The rootfs check is a plain `stat`; the runtime never provisions it.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(NexusError::validation("hostname must not be empty"));
        }
        if self.hostname.len() > HOST_NAME_MAX {
            return Err(NexusError::validation(format!(
                "hostname is {} bytes, limit is {HOST_NAME_MAX}",
                self.hostname.len()
            )));
        }
        if self.command.first().is_none_or(String::is_empty) {
            return Err(NexusError::validation("command must name an executable"));
        }
        if self.command.iter().any(|arg| arg.contains('\0')) {
            return Err(NexusError::validation("command contains a NUL byte"));
        }
        if !self.rootfs_path.is_absolute() {
            return Err(NexusError::validation(format!(
                "rootfs path {} is not absolute",
                self.rootfs_path.display()
            )));
        }
        if !self.rootfs_path.is_dir() {
            return Err(NexusError::validation(format!(
                "rootfs {} does not exist",
                self.rootfs_path.display()
            )));
        }
        let _ = self.memory_bytes()?;
        Ok(())
    }

    /// Returns the memory limit in bytes, or `None` when unlimited.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the conversion overflows.
    pub fn memory_bytes(&self) -> Result<Option<u64>> {
        if self.memory_mb <= 0 {
            return Ok(None);
        }
        self.memory_mb
            .checked_mul(BYTES_PER_MB)
            .and_then(|b| u64::try_from(b).ok())
            .map(Some)
            .ok_or_else(|| {
                NexusError::validation(format!("memory of {} MB overflows", self.memory_mb))
            })
    }

    /// Returns the cgroup limits derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the memory conversion overflows.
    pub fn limits(&self) -> Result<ResourceLimits> {
        Ok(ResourceLimits {
            memory_bytes: self.memory_bytes()?,
            cpu_shares: (self.cpu_shares > 0).then_some(self.cpu_shares),
        })
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Setup in progress; no process has been confirmed yet.
    Created,
    /// The node process is alive.
    Running,
    /// The node process has exited or was stopped.
    Stopped,
    /// Setup failed or the node's resources are inconsistent.
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Mutable lifecycle record for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Configuration the node was created with.
    #[serde(flatten)]
    pub config: NodeConfig,
    /// Host-visible PID of the node process, when running.
    pub pid: Option<u32>,
    /// Current lifecycle status.
    pub status: NodeStatus,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl NodeState {
    /// Creates a record in the `Created` state.
    #[must_use]
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            pid: None,
            status: NodeStatus::Created,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Returns the node ID.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.config.id
    }

    /// Returns `true` if the record says the node is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rootfs: PathBuf) -> NodeConfig {
        NodeConfig {
            id: NodeId::new("web1").unwrap(),
            hostname: "web1".into(),
            memory_mb: 128,
            cpu_shares: 512,
            rootfs_path: rootfs,
            command: vec!["/bin/sh".into(), "-c".into(), "sleep 3600".into()],
        }
    }

    #[test]
    fn node_id_rejects_unsafe_values() {
        for bad in ["", ".", "..", ".hidden", "a/b", "a b", "a\0b", "ünï"] {
            assert!(NodeId::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(NodeId::new("x".repeat(NODE_ID_MAX + 1)).is_err());
    }

    #[test]
    fn node_id_accepts_typical_names() {
        for good in ["web1", "db-primary", "cache_2", "node.v1"] {
            assert_eq!(NodeId::new(good).unwrap().as_str(), good);
        }
    }

    #[test]
    fn node_id_deserialization_validates() {
        let parsed: std::result::Result<NodeId, _> = serde_json::from_str("\"../etc\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn memory_converts_megabytes_to_bytes() {
        let limits = config(existing_dir()).limits().unwrap();
        assert_eq!(limits.memory_bytes, Some(128 * 1024 * 1024));
        assert_eq!(limits.cpu_shares, Some(512));
    }

    #[test]
    fn zero_or_negative_memory_means_unlimited() {
        let mut conf = config(existing_dir());
        conf.memory_mb = 0;
        assert_eq!(conf.memory_bytes().unwrap(), None);
        conf.memory_mb = -5;
        assert_eq!(conf.memory_bytes().unwrap(), None);
        conf.cpu_shares = 0;
        assert_eq!(conf.limits().unwrap().cpu_shares, None);
    }

    #[test]
    fn overflowing_memory_is_a_validation_error() {
        let mut conf = config(existing_dir());
        conf.memory_mb = i64::MAX;
        let err = conf.memory_bytes().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn validate_rejects_empty_command_and_missing_rootfs() {
        let mut conf = config(existing_dir());
        conf.command.clear();
        assert!(conf.validate().is_err());

        let conf = config(PathBuf::from("/definitely/not/a/rootfs"));
        assert!(conf.validate().is_err());

        let conf = config(PathBuf::from("relative/rootfs"));
        assert!(conf.validate().is_err());
    }

    #[test]
    fn validate_accepts_existing_rootfs() {
        assert!(config(existing_dir()).validate().is_ok());
    }

    #[test]
    fn state_serializes_config_flattened() {
        let state = NodeState::new(config(existing_dir()));
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["id"], "web1");
        assert_eq!(value["memory_mb"], 128);
        assert_eq!(value["status"], "Created");
        assert!(value["pid"].is_null());
    }

    #[test]
    fn only_running_records_report_running() {
        let mut state = NodeState::new(config(existing_dir()));
        assert!(!state.is_running());
        state.status = NodeStatus::Running;
        assert!(state.is_running());
    }

    fn existing_dir() -> PathBuf {
        std::env::temp_dir()
    }
}
