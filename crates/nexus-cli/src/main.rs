//! # nexus — Nexus CLI
//!
//! Creates, inspects, and stops isolated nodes on a single host.
//! The same binary serves as each node's init stage.

#![allow(clippy::print_stdout)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use clap::Parser;

use crate::commands::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The init stage installs its own subscriber once it has verified it
    // runs single-threaded.
    if matches!(cli.command, Command::Init) {
        return commands::init::execute();
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    commands::execute(cli)
}
