//! `nexus create` — Create and start a node.

use std::path::PathBuf;

use clap::Args;
use nexus_runtime::orchestrator::NodeRequest;

use super::GlobalArgs;
use crate::output;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Node name; also its hostname.
    pub name: String,

    /// Memory limit in MiB. Zero or negative means unlimited.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub memory: i64,

    /// Relative CPU weight in shares. Zero keeps the kernel default.
    #[arg(short, long, default_value_t = 0)]
    pub cpu_shares: u64,

    /// Root filesystem to boot instead of the default image.
    #[arg(long)]
    pub rootfs: Option<PathBuf>,

    /// Command to run as the node's PID 1.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Executes the `create` command.
///
/// # Errors
///
/// Returns an error if the node cannot be created.
pub fn execute(global: &GlobalArgs, args: CreateArgs) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(global.runtime_config())?;
    let state = orchestrator.create_node_with(NodeRequest {
        name: args.name,
        memory_mb: args.memory,
        cpu_shares: args.cpu_shares,
        rootfs: args.rootfs,
        command: (!args.command.is_empty()).then_some(args.command),
    })?;
    output::print_created(&state);
    Ok(())
}
