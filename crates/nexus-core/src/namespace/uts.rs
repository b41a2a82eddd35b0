//! UTS namespace isolation.
//!
//! Gives the node its own hostname.

use nexus_common::error::{NexusError, Result};

/// Sets the hostname inside the caller's UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(node: &str, hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| NexusError::ResourceSetup {
        node: node.to_string(),
        stage: "hostname",
        message: format!("sethostname {hostname:?} failed: {e}"),
    })?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}
