//! The frozen isolation profile every node runs under.
//!
//! A profile bundles the namespaces, capability bounding set, and mount
//! table applied by the init stage. It carries no per-node tuning beyond
//! the hostname: all nodes share the same namespaces, capabilities, and
//! mounts.

use nexus_common::types::NodeConfig;
use serde::{Deserialize, Serialize};

use crate::capability::{BOUNDING_SET, Capability};
use crate::filesystem::mount::{MountEntry, MountFlag};
use crate::namespace::NamespaceSet;

/// Isolation settings handed to the init stage of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationProfile {
    /// Namespaces the node lives in.
    pub namespaces: NamespaceSet,
    /// Capabilities kept in the bounding set.
    pub capabilities: Vec<Capability>,
    /// Mounts applied inside the rootfs, in order.
    pub mounts: Vec<MountEntry>,
    /// Hostname set in the UTS namespace.
    pub hostname: String,
}

impl IsolationProfile {
    /// Builds the profile for `config`.
    #[must_use]
    pub fn build(config: &NodeConfig) -> Self {
        Self {
            namespaces: NamespaceSet::all(),
            capabilities: BOUNDING_SET.to_vec(),
            mounts: default_mounts(),
            hostname: config.hostname.clone(),
        }
    }
}

/// The mount table applied to every node rootfs.
#[must_use]
pub fn default_mounts() -> Vec<MountEntry> {
    use MountFlag::{NoDev, NoExec, NoSuid, StrictAtime};

    vec![
        MountEntry::new("proc", "/proc", "proc", &[NoExec, NoSuid, NoDev]),
        MountEntry::new("sysfs", "/sys", "sysfs", &[NoExec, NoSuid, NoDev]),
        MountEntry::new("tmpfs", "/dev", "tmpfs", &[NoSuid, StrictAtime]).with_data("mode=755"),
        MountEntry::new("devpts", "/dev/pts", "devpts", &[NoSuid, NoExec]),
        MountEntry::new("shm", "/dev/shm", "tmpfs", &[NoSuid, NoExec, NoDev]),
    ]
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use nexus_common::types::NodeId;
    use nix::mount::MsFlags;

    use super::*;
    use crate::namespace::Namespace;

    fn config() -> NodeConfig {
        NodeConfig {
            id: NodeId::new("web1").unwrap(),
            hostname: "web1".into(),
            memory_mb: 128,
            cpu_shares: 512,
            rootfs_path: PathBuf::from("/var/lib/nexus/images/alpine-base"),
            command: vec!["/bin/sh".into()],
        }
    }

    #[test]
    fn profile_uses_every_namespace_and_the_fixed_bounding_set() {
        let profile = IsolationProfile::build(&config());
        for ns in [
            Namespace::Pid,
            Namespace::Mount,
            Namespace::Uts,
            Namespace::Ipc,
            Namespace::Network,
            Namespace::Cgroup,
        ] {
            assert!(profile.namespaces.contains(ns), "missing {ns}");
        }
        assert_eq!(profile.capabilities, BOUNDING_SET.to_vec());
        assert_eq!(profile.hostname, "web1");
    }

    #[test]
    fn mount_table_matches_expected_entries() {
        let mounts = default_mounts();
        let summary: Vec<(&str, &str, &str, MsFlags, Option<&str>)> = mounts
            .iter()
            .map(|m| {
                (
                    m.source.as_str(),
                    m.destination.to_str().unwrap(),
                    m.device.as_str(),
                    m.ms_flags(),
                    m.data.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    "proc",
                    "/proc",
                    "proc",
                    MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                    None
                ),
                (
                    "sysfs",
                    "/sys",
                    "sysfs",
                    MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                    None
                ),
                (
                    "tmpfs",
                    "/dev",
                    "tmpfs",
                    MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
                    Some("mode=755")
                ),
                (
                    "devpts",
                    "/dev/pts",
                    "devpts",
                    MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
                    None
                ),
                (
                    "shm",
                    "/dev/shm",
                    "tmpfs",
                    MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
                    None
                ),
            ]
        );
    }

    #[test]
    fn profile_survives_a_json_round_trip() {
        let profile = IsolationProfile::build(&config());
        let json = serde_json::to_string(&profile).unwrap();
        let back: IsolationProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }
}
