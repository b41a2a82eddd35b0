//! Node lifecycle management for the Nexus runtime.
//!
//! Creation is two-staged: [`process`] clones a child into new namespaces
//! and re-execs the runtime binary, whose [`init`] entry point finishes
//! isolation and execs the node command. The two stages talk over the
//! framed [`channel`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod channel;
pub mod container;
pub mod init;
pub mod orchestrator;
pub mod process;
pub mod state;
