//! Linux namespace management for node isolation.
//!
//! Five namespaces are created by `clone(2)` when the init stage is spawned.
//! The cgroup namespace is unshared later, from inside the init stage, once
//! the parent has moved it into the node's cgroup; unsharing it earlier would
//! root the namespace at the runtime's own cgroup.

pub mod uts;

use std::fmt;

use nexus_common::error::{NexusError, Result};
use nix::sched::{CloneFlags, unshare};
use serde::{Deserialize, Serialize};

/// A namespace type a node is isolated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// Process IDs; the node command becomes PID 1.
    Pid,
    /// Mount table.
    Mount,
    /// Hostname and domain name.
    Uts,
    /// System V IPC objects and POSIX message queues.
    Ipc,
    /// Network stack.
    Network,
    /// Cgroup hierarchy view.
    Cgroup,
}

impl Namespace {
    /// Returns the `clone(2)`/`unshare(2)` flag for this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }

    /// Returns `true` if this namespace must be entered after cgroup placement.
    #[must_use]
    pub const fn is_deferred(self) -> bool {
        matches!(self, Self::Cgroup)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pid => "pid",
            Self::Mount => "mnt",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::Network => "net",
            Self::Cgroup => "cgroup",
        };
        f.write_str(name)
    }
}

/// The set of namespaces a node is isolated by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSet(Vec<Namespace>);

impl NamespaceSet {
    /// Every namespace nodes are isolated by. There is no partial mode.
    #[must_use]
    pub fn all() -> Self {
        Self(vec![
            Namespace::Pid,
            Namespace::Mount,
            Namespace::Uts,
            Namespace::Ipc,
            Namespace::Network,
            Namespace::Cgroup,
        ])
    }

    /// Returns the namespaces in this set.
    #[must_use]
    pub fn as_slice(&self) -> &[Namespace] {
        &self.0
    }

    /// Returns `true` if the set contains `ns`.
    #[must_use]
    pub fn contains(&self, ns: Namespace) -> bool {
        self.0.contains(&ns)
    }

    /// Flags passed to `clone(2)` when spawning the init stage.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        self.0
            .iter()
            .filter(|ns| !ns.is_deferred())
            .fold(CloneFlags::empty(), |acc, ns| acc | ns.clone_flag())
    }

    /// Flags the init stage unshares after cgroup placement.
    #[must_use]
    pub fn deferred_flags(&self) -> CloneFlags {
        self.0
            .iter()
            .filter(|ns| ns.is_deferred())
            .fold(CloneFlags::empty(), |acc, ns| acc | ns.clone_flag())
    }
}

/// Unshares the deferred namespaces of `set` for the calling process.
///
/// # Errors
///
/// Returns an error if the `unshare(2)` syscall fails.
pub fn enter_deferred(node: &str, set: &NamespaceSet) -> Result<()> {
    let flags = set.deferred_flags();
    if flags.is_empty() {
        return Ok(());
    }
    unshare(flags).map_err(|e| NexusError::ResourceSetup {
        node: node.to_string(),
        stage: "namespaces",
        message: format!("unshare {flags:?} failed: {e}"),
    })?;
    tracing::debug!(?flags, "deferred namespaces entered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_six_namespaces() {
        let set = NamespaceSet::all();
        assert_eq!(set.as_slice().len(), 6);
        for ns in [
            Namespace::Pid,
            Namespace::Mount,
            Namespace::Uts,
            Namespace::Ipc,
            Namespace::Network,
            Namespace::Cgroup,
        ] {
            assert!(set.contains(ns), "{ns} missing");
        }
    }

    #[test]
    fn cgroup_namespace_is_deferred_past_clone() {
        let set = NamespaceSet::all();
        let clone = set.clone_flags();
        assert!(clone.contains(CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS));
        assert!(clone.contains(CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC));
        assert!(clone.contains(CloneFlags::CLONE_NEWNET));
        assert!(!clone.contains(CloneFlags::CLONE_NEWCGROUP));
        assert_eq!(set.deferred_flags(), CloneFlags::CLONE_NEWCGROUP);
    }
}
