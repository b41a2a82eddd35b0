//! `nexus state` — Show the reconciled state of a node.

use clap::Args;

use super::GlobalArgs;
use crate::output;

/// Arguments for the `state` command.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Name of the node to inspect.
    pub name: String,

    /// Print the full record as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `state` command.
///
/// # Errors
///
/// Returns an error if the node is unknown or its record is unreadable.
pub fn execute(global: &GlobalArgs, args: &StateArgs) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(global.runtime_config())?;
    let state = orchestrator.node_state(&args.name)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        output::print_state(&state);
    }
    Ok(())
}
