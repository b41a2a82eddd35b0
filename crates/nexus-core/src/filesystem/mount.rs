//! Mount utilities for node filesystem setup.
//!
//! Handles mounting `/proc`, `/sys`, `/dev` and friends inside the node's
//! mount namespace, relative to its rootfs.

use std::path::{Path, PathBuf};

use nexus_common::error::{NexusError, Result};
use nix::mount::{MsFlags, mount};
use serde::{Deserialize, Serialize};

/// A mount flag, kept as data so mount tables can cross the init channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MountFlag {
    /// `MS_NOEXEC`.
    NoExec,
    /// `MS_NOSUID`.
    NoSuid,
    /// `MS_NODEV`.
    NoDev,
    /// `MS_STRICTATIME`.
    StrictAtime,
}

impl MountFlag {
    const fn to_ms_flag(self) -> MsFlags {
        match self {
            Self::NoExec => MsFlags::MS_NOEXEC,
            Self::NoSuid => MsFlags::MS_NOSUID,
            Self::NoDev => MsFlags::MS_NODEV,
            Self::StrictAtime => MsFlags::MS_STRICTATIME,
        }
    }
}

/// One entry of a node's mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Mount source (`proc`, `tmpfs`, ...).
    pub source: String,
    /// Absolute destination inside the node rootfs.
    pub destination: PathBuf,
    /// Filesystem type.
    pub device: String,
    /// Mount flags.
    pub flags: Vec<MountFlag>,
    /// Filesystem-specific options passed as mount data.
    pub data: Option<String>,
}

impl MountEntry {
    /// Creates an entry without mount data.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        device: impl Into<String>,
        flags: &[MountFlag],
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            device: device.into(),
            flags: flags.to_vec(),
            data: None,
        }
    }

    /// Attaches mount data to the entry.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Combined `mount(2)` flags for this entry.
    #[must_use]
    pub fn ms_flags(&self) -> MsFlags {
        self.flags
            .iter()
            .fold(MsFlags::empty(), |acc, f| acc | f.to_ms_flag())
    }

    /// Resolves the destination against `rootfs`.
    #[must_use]
    pub fn target_in(&self, rootfs: &Path) -> PathBuf {
        rootfs.join(self.destination.strip_prefix("/").unwrap_or(&self.destination))
    }
}

/// Makes every mount under `/` private so nothing propagates back to the host.
///
/// # Errors
///
/// Returns an error if the remount fails.
pub fn make_root_private(node: &str) -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| setup_error(node, "mount propagation", format!("make / rprivate: {e}")))?;
    tracing::debug!("root mount made private");
    Ok(())
}

/// Bind-mounts `rootfs` onto itself, turning it into a mount point for `pivot_root(2)`.
///
/// # Errors
///
/// Returns an error if the bind mount fails.
pub fn bind_rootfs(node: &str, rootfs: &Path) -> Result<()> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| setup_error(node, "mount rootfs", format!("bind {}: {e}", rootfs.display())))?;
    tracing::debug!(rootfs = %rootfs.display(), "rootfs bound onto itself");
    Ok(())
}

/// Mounts every entry of `table` under `rootfs`, in order.
///
/// Each destination directory is created right before its mount, so entries
/// nested inside an earlier tmpfs (`/dev/pts` under `/dev`) land on it.
///
/// # Errors
///
/// Returns an error naming the first entry that could not be mounted.
pub fn mount_table(node: &str, rootfs: &Path, table: &[MountEntry]) -> Result<()> {
    for entry in table {
        let target = entry.target_in(rootfs);
        std::fs::create_dir_all(&target).map_err(|e| {
            setup_error(node, "mount table", format!("create {}: {e}", target.display()))
        })?;
        mount(
            Some(entry.source.as_str()),
            &target,
            Some(entry.device.as_str()),
            entry.ms_flags(),
            entry.data.as_deref(),
        )
        .map_err(|e| {
            setup_error(
                node,
                "mount table",
                format!(
                    "mount {} ({}) on {}: {e}",
                    entry.source,
                    entry.device,
                    entry.destination.display()
                ),
            )
        })?;
        tracing::debug!(
            destination = %entry.destination.display(),
            device = %entry.device,
            "mounted"
        );
    }
    Ok(())
}

fn setup_error(node: &str, stage: &'static str, message: String) -> NexusError {
    NexusError::ResourceSetup {
        node: node.to_string(),
        stage,
        message,
    }
}
