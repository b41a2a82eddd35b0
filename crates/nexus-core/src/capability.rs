//! Linux capability management for least-privilege execution.
//!
//! Every node runs with the same frozen bounding set. Anything outside
//! [`BOUNDING_SET`] is dropped from the bounding set before the node
//! command is exec'd, so neither the node nor its descendants can regain it.

use std::fmt;

use caps::CapSet;
use nexus_common::error::{NexusError, Result};
use serde::{Deserialize, Serialize};

/// Linux capability identifiers retained by nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Change file ownership.
    Chown,
    /// Bypass file permission checks.
    DacOverride,
    /// Keep set-user-ID bits on modified files.
    Fsetid,
    /// Bypass owner checks on files.
    Fowner,
    /// Create device nodes.
    Mknod,
    /// Use raw and packet sockets.
    NetRaw,
    /// Set group IDs.
    Setgid,
    /// Set user IDs.
    Setuid,
    /// Modify capability sets of the process.
    Setpcap,
    /// Bind to privileged ports (< 1024).
    NetBindService,
    /// Use `chroot(2)`.
    SysChroot,
    /// Send signals to arbitrary processes.
    Kill,
}

/// The bounding set granted to every node, in declaration order.
pub const BOUNDING_SET: [Capability; 12] = [
    Capability::Chown,
    Capability::DacOverride,
    Capability::Fsetid,
    Capability::Fowner,
    Capability::Mknod,
    Capability::NetRaw,
    Capability::Setgid,
    Capability::Setuid,
    Capability::Setpcap,
    Capability::NetBindService,
    Capability::SysChroot,
    Capability::Kill,
];

impl Capability {
    /// Converts to the `caps` crate representation.
    #[must_use]
    pub const fn to_caps(self) -> caps::Capability {
        match self {
            Self::Chown => caps::Capability::CAP_CHOWN,
            Self::DacOverride => caps::Capability::CAP_DAC_OVERRIDE,
            Self::Fsetid => caps::Capability::CAP_FSETID,
            Self::Fowner => caps::Capability::CAP_FOWNER,
            Self::Mknod => caps::Capability::CAP_MKNOD,
            Self::NetRaw => caps::Capability::CAP_NET_RAW,
            Self::Setgid => caps::Capability::CAP_SETGID,
            Self::Setuid => caps::Capability::CAP_SETUID,
            Self::Setpcap => caps::Capability::CAP_SETPCAP,
            Self::NetBindService => caps::Capability::CAP_NET_BIND_SERVICE,
            Self::SysChroot => caps::Capability::CAP_SYS_CHROOT,
            Self::Kill => caps::Capability::CAP_KILL,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_caps())
    }
}

/// Drops every capability not in `keep` from the bounding set.
///
/// The ambient set is cleared as well so nothing outside `keep` survives
/// `execve(2)`. Requires `CAP_SETPCAP` in the calling process.
///
/// # Errors
///
/// Returns an error if reading or modifying a capability set fails.
pub fn restrict_bounding_set(node: &str, keep: &[Capability]) -> Result<()> {
    let keep: caps::CapsHashSet = keep.iter().map(|c| c.to_caps()).collect();
    let current = caps::read(None, CapSet::Bounding).map_err(|e| setup_error(node, &e))?;

    // caps::set refuses the bounding set, so each extra capability is dropped individually.
    let mut dropped = 0usize;
    for cap in current.difference(&keep) {
        caps::drop(None, CapSet::Bounding, *cap).map_err(|e| setup_error(node, &e))?;
        dropped += 1;
    }
    if let Err(e) = caps::clear(None, CapSet::Ambient) {
        tracing::warn!(error = %e, "failed to clear ambient capabilities");
    }

    tracing::debug!(retained = keep.len(), dropped, "bounding set restricted");
    Ok(())
}

fn setup_error(node: &str, e: &caps::errors::CapsError) -> NexusError {
    NexusError::ResourceSetup {
        node: node.to_string(),
        stage: "capabilities",
        message: e.to_string(),
    }
}
