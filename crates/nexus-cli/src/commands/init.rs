//! `nexus init` — Second stage of node creation.
//!
//! Never invoked by users: the runtime re-execs itself with this subcommand
//! inside a node's namespaces.

/// Executes the `init` command. Does not return on success.
///
/// # Errors
///
/// Returns an error if isolation setup or exec fails.
pub fn execute() -> anyhow::Result<()> {
    match nexus_runtime::init::run() {
        Ok(never) => match never {},
        Err(e) => Err(e.into()),
    }
}
