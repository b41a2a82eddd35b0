//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`.

use std::path::Path;

use nexus_common::error::{NexusError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::{chdir, pivot_root as sys_pivot_root};

/// Switches the root filesystem to `new_root`.
///
/// Uses the same path for the new and the old root: after the pivot the old
/// root is stacked on top of `/`, made a recursive slave so the detach does
/// not propagate to the host, and lazily unmounted.
///
/// `new_root` must already be a mount point (see
/// [`bind_rootfs`](super::mount::bind_rootfs)).
///
/// # Errors
///
/// Returns an error if `pivot_root(2)` or the subsequent cleanup fails.
pub fn pivot_root(node: &str, new_root: &Path) -> Result<()> {
    let fail = |step: &str, e: nix::Error| NexusError::ResourceSetup {
        node: node.to_string(),
        stage: "pivot_root",
        message: format!("{step} ({}): {e}", new_root.display()),
    };

    chdir(new_root).map_err(|e| fail("chdir", e))?;
    sys_pivot_root(".", ".").map_err(|e| fail("pivot_root", e))?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| fail("make old root rslave", e))?;
    umount2("/", MntFlags::MNT_DETACH).map_err(|e| fail("detach old root", e))?;
    chdir("/").map_err(|e| fail("chdir /", e))?;

    tracing::info!(new_root = %new_root.display(), "pivot_root complete");
    Ok(())
}
