//! Container runtime abstraction.
//!
//! The orchestrator talks to a [`ContainerRuntime`] only, so it can be
//! driven by the Linux implementation in production and by an in-memory
//! double in tests.

pub mod linux;

use nexus_common::error::Result;
use nexus_common::types::{NodeConfig, NodeId, NodeState};

/// Result of a successful stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The node was running and has been stopped.
    Stopped,
    /// The node had already stopped; nothing was done.
    AlreadyStopped,
}

/// Lifecycle engine for isolated nodes.
///
/// Implementors own the OS-level details of creating, stopping, and
/// inspecting nodes.
pub trait ContainerRuntime: Send + Sync {
    /// Creates the node described by `config` and starts its command.
    ///
    /// On any failure after resources were allocated, the implementation
    /// releases them before returning. If that cleanup fails too, the error
    /// is a double fault.
    ///
    /// # Errors
    ///
    /// Returns a validation, resource setup, launch, already-exists, or
    /// cleanup error.
    fn create_and_start(&self, config: &NodeConfig) -> Result<NodeState>;

    /// Stops a node: SIGTERM, grace period, SIGKILL, then cgroup removal.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown IDs.
    fn stop(&self, id: &NodeId) -> Result<StopOutcome>;

    /// Returns the node's state, reconciled against the live system.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown IDs.
    fn get_state(&self, id: &NodeId) -> Result<NodeState>;

    /// Kills the node if needed and releases its cgroup and state directory.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown IDs.
    fn remove(&self, id: &NodeId) -> Result<()>;

    /// Returns the reconciled state of every tracked node.
    ///
    /// # Errors
    ///
    /// Returns an error if the state root cannot be read.
    fn list(&self) -> Result<Vec<NodeState>>;
}
