//! # nexus-core
//!
//! Linux isolation primitives for Nexus nodes.
//!
//! This crate provides safe wrappers over:
//! - **Namespaces**: PID, mount, UTS, IPC, network, and cgroup isolation.
//! - **Cgroups v2**: memory and CPU limits under a shared parent cgroup.
//! - **Filesystem**: the node mount table and `pivot_root`.
//! - **Capabilities**: restricting the bounding set before exec.
//!
//! The [`profile`] module ties these together into the fixed profile every
//! node runs under.
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod profile;
