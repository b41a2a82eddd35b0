//! Filesystem setup for node isolation.
//!
//! Provides the fixed pseudo-filesystem mount table and `pivot_root` for
//! switching into the node's root filesystem.

pub mod mount;
pub mod pivot_root;
