//! `nexus rm` — Remove a node and free its name.

use clap::Args;

use super::GlobalArgs;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Name of the node to remove.
    pub name: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the node is unknown or its resources cannot be released.
pub fn execute(global: &GlobalArgs, args: &RmArgs) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(global.runtime_config())?;
    orchestrator.remove_node(&args.name)?;
    println!("Removed {}", args.name);
    Ok(())
}
