//! `nexus list` — List every tracked node.

use clap::Args;

use super::GlobalArgs;
use crate::output;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Show stopped and failed nodes too.
    #[arg(short, long)]
    pub all: bool,

    /// Print the records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the state root cannot be read.
pub fn execute(global: &GlobalArgs, args: &ListArgs) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(global.runtime_config())?;
    let nodes: Vec<_> = orchestrator
        .list_nodes()?
        .into_iter()
        .filter(|n| args.all || n.is_running())
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    } else if nodes.is_empty() {
        println!("No nodes found.");
    } else {
        output::print_table(&nodes);
    }
    Ok(())
}
