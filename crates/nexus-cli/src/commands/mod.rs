//! CLI command definitions and dispatch.

pub mod create;
pub mod init;
pub mod list;
pub mod rm;
pub mod state;
pub mod stop;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use nexus_common::config::{NodeDefaults, RuntimeConfig};
use nexus_common::constants::{DEFAULT_CGROUP_ROOT, DEFAULT_STATE_ROOT};
use nexus_runtime::backend::linux::LinuxRuntime;
use nexus_runtime::orchestrator::NodeOrchestrator;

/// Nexus — minimal single-host node runtime.
#[derive(Parser, Debug)]
#[command(name = "nexus", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime locations shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options that locate the runtime's on-host state.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding one state directory per node.
    #[arg(long, global = true, env = "NEXUS_STATE_ROOT", default_value = DEFAULT_STATE_ROOT)]
    pub state_root: PathBuf,

    /// Parent cgroup under which node cgroups are created.
    #[arg(long, global = true, env = "NEXUS_CGROUP_ROOT", default_value = DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,
}

impl GlobalArgs {
    /// Builds the runtime configuration these options describe.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            state_root: self.state_root.clone(),
            cgroup_root: self.cgroup_root.clone(),
            ..RuntimeConfig::default()
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a node.
    Create(create::CreateArgs),
    /// Stop a running node.
    Stop(stop::StopArgs),
    /// Show the reconciled state of a node.
    State(state::StateArgs),
    /// List every tracked node.
    List(list::ListArgs),
    /// Remove a node and free its name.
    Rm(rm::RmArgs),
    /// Second stage of node creation. Invoked by the runtime only.
    #[command(hide = true)]
    Init,
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.command {
        Command::Create(args) => create::execute(&global, args),
        Command::Stop(args) => stop::execute(&global, &args),
        Command::State(args) => state::execute(&global, &args),
        Command::List(args) => list::execute(&global, &args),
        Command::Rm(args) => rm::execute(&global, &args),
        Command::Init => init::execute(),
    }
}

/// Builds an orchestrator over the Linux runtime.
///
/// # Errors
///
/// Returns an error if the state root or parent cgroup cannot be prepared.
pub fn orchestrator(config: RuntimeConfig) -> anyhow::Result<NodeOrchestrator> {
    tracing::debug!(
        state_root = %config.state_root.display(),
        cgroup_root = %config.cgroup_root.display(),
        "opening runtime"
    );
    let runtime = LinuxRuntime::new(config)?;
    Ok(NodeOrchestrator::new(Box::new(runtime), NodeDefaults::default()))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_parses_budget_and_trailing_command() {
        let cli = Cli::try_parse_from([
            "nexus", "create", "web1", "--memory", "128", "--cpu-shares", "512", "--", "/bin/sh",
            "-c", "echo hi",
        ])
        .unwrap();
        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.name, "web1");
        assert_eq!(args.memory, 128);
        assert_eq!(args.cpu_shares, 512);
        assert_eq!(args.command, vec!["/bin/sh", "-c", "echo hi"]);
    }

    #[test]
    fn global_roots_default_to_system_paths() {
        let cli = Cli::try_parse_from(["nexus", "list"]).unwrap();
        if std::env::var_os("NEXUS_STATE_ROOT").is_none() {
            assert_eq!(cli.global.state_root, PathBuf::from(DEFAULT_STATE_ROOT));
        }
        let cli = Cli::try_parse_from(["nexus", "--cgroup-root", "/tmp/cg", "list"]).unwrap();
        assert_eq!(cli.global.runtime_config().cgroup_root, PathBuf::from("/tmp/cg"));
    }

    #[test]
    fn init_is_hidden_but_parseable() {
        let cli = Cli::try_parse_from(["nexus", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init));
        let help = Cli::command().render_help().to_string();
        assert!(!help.contains("Second stage"));
    }
}
