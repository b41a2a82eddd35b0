//! `nexus stop` — Stop a node and release its cgroup.

use clap::Args;
use nexus_runtime::backend::StopOutcome;

use super::GlobalArgs;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Name of the node to stop.
    pub name: String,

    /// Seconds to wait after SIGTERM before sending SIGKILL.
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the node is unknown or cannot be stopped.
pub fn execute(global: &GlobalArgs, args: &StopArgs) -> anyhow::Result<()> {
    let mut config = global.runtime_config();
    if let Some(secs) = args.timeout {
        config.stop_timeout_ms = secs.saturating_mul(1000);
    }
    let orchestrator = super::orchestrator(config)?;
    match orchestrator.stop_node(&args.name)? {
        StopOutcome::Stopped => println!("Stopped {}", args.name),
        StopOutcome::AlreadyStopped => println!("{} was already stopped", args.name),
    }
    Ok(())
}
