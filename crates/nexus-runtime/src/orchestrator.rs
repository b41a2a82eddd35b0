//! Application façade over a [`ContainerRuntime`].
//!
//! Turns user-level requests (a name and a budget) into validated node
//! configurations, fills in the deployment defaults, and annotates every
//! error with the operation and node it belongs to.

use std::path::PathBuf;

use nexus_common::config::NodeDefaults;
use nexus_common::error::{NexusError, Result};
use nexus_common::types::{NodeConfig, NodeId, NodeState};

use crate::backend::{ContainerRuntime, StopOutcome};

/// A request to create a node. Unset fields fall back to [`NodeDefaults`].
#[derive(Debug, Clone, Default)]
pub struct NodeRequest {
    /// Node name; also its ID and hostname.
    pub name: String,
    /// Memory budget in megabytes. Zero or negative means unlimited.
    pub memory_mb: i64,
    /// Relative CPU weight in shares. Zero means the kernel default.
    pub cpu_shares: u64,
    /// Root filesystem override.
    pub rootfs: Option<PathBuf>,
    /// Command override.
    pub command: Option<Vec<String>>,
}

/// Coordinates node operations on top of a runtime.
pub struct NodeOrchestrator {
    runtime: Box<dyn ContainerRuntime>,
    defaults: NodeDefaults,
}

impl NodeOrchestrator {
    /// Creates an orchestrator driving `runtime`.
    #[must_use]
    pub fn new(runtime: Box<dyn ContainerRuntime>, defaults: NodeDefaults) -> Self {
        Self { runtime, defaults }
    }

    /// Creates and starts a node with the default rootfs and command.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or unusable name, otherwise
    /// whatever the runtime reports, wrapped with context.
    pub fn create_node(&self, name: &str, memory_mb: i64, cpu_shares: u64) -> Result<NodeState> {
        self.create_node_with(NodeRequest {
            name: name.to_string(),
            memory_mb,
            cpu_shares,
            ..NodeRequest::default()
        })
    }

    /// Creates and starts a node from a full request.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid request, otherwise
    /// whatever the runtime reports, wrapped with context.
    pub fn create_node_with(&self, request: NodeRequest) -> Result<NodeState> {
        let name = request.name.clone();
        let config = self
            .build_config(request)
            .map_err(|e| e.context("create", &name))?;
        tracing::info!(id = %config.id, memory_mb = config.memory_mb, cpu_shares = config.cpu_shares, "create node requested");
        self.runtime
            .create_and_start(&config)
            .map_err(|e| e.context("create", &name))
    }

    /// Stops a node.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown nodes.
    pub fn stop_node(&self, name: &str) -> Result<StopOutcome> {
        let id = parse_id(name).map_err(|e| e.context("stop", name))?;
        self.runtime.stop(&id).map_err(|e| e.context("stop", name))
    }

    /// Returns the reconciled state of a node.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown nodes.
    pub fn node_state(&self, name: &str) -> Result<NodeState> {
        let id = parse_id(name).map_err(|e| e.context("inspect", name))?;
        self.runtime
            .get_state(&id)
            .map_err(|e| e.context("inspect", name))
    }

    /// Removes a node and frees its name.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown nodes.
    pub fn remove_node(&self, name: &str) -> Result<()> {
        let id = parse_id(name).map_err(|e| e.context("remove", name))?;
        self.runtime.remove(&id).map_err(|e| e.context("remove", name))
    }

    /// Lists every tracked node.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot enumerate its state.
    pub fn list_nodes(&self) -> Result<Vec<NodeState>> {
        self.runtime.list().map_err(|e| e.context("list", "*"))
    }

    fn build_config(&self, request: NodeRequest) -> Result<NodeConfig> {
        let id = parse_id(&request.name)?;
        let config = NodeConfig {
            id,
            hostname: request.name,
            memory_mb: request.memory_mb,
            cpu_shares: request.cpu_shares,
            rootfs_path: request.rootfs.unwrap_or_else(|| self.defaults.rootfs.clone()),
            command: request
                .command
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.defaults.command.clone()),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_id(name: &str) -> Result<NodeId> {
    if name.is_empty() {
        return Err(NexusError::validation("node name must not be empty"));
    }
    NodeId::new(name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use nexus_common::error::ErrorKind;
    use nexus_common::types::NodeStatus;

    use super::*;

    /// In-memory runtime recording the calls it receives.
    #[derive(Default)]
    struct MockRuntime {
        nodes: Mutex<BTreeMap<NodeId, NodeState>>,
        creates: Mutex<Vec<NodeConfig>>,
        fail_create: Option<fn(&NodeConfig) -> NexusError>,
    }

    impl ContainerRuntime for Arc<MockRuntime> {
        fn create_and_start(&self, config: &NodeConfig) -> Result<NodeState> {
            self.creates.lock().unwrap().push(config.clone());
            if let Some(fail) = self.fail_create {
                return Err(fail(config));
            }
            let mut nodes = self.nodes.lock().unwrap();
            if nodes.contains_key(&config.id) {
                return Err(NexusError::AlreadyExists {
                    id: config.id.to_string(),
                });
            }
            let mut state = NodeState::new(config.clone());
            state.status = NodeStatus::Running;
            state.pid = Some(4242);
            let _ = nodes.insert(config.id.clone(), state.clone());
            Ok(state)
        }

        fn stop(&self, id: &NodeId) -> Result<StopOutcome> {
            let mut nodes = self.nodes.lock().unwrap();
            let state = nodes.get_mut(id).ok_or_else(|| not_found(id))?;
            if state.status == NodeStatus::Stopped {
                return Ok(StopOutcome::AlreadyStopped);
            }
            state.status = NodeStatus::Stopped;
            state.pid = None;
            Ok(StopOutcome::Stopped)
        }

        fn get_state(&self, id: &NodeId) -> Result<NodeState> {
            self.nodes
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| not_found(id))
        }

        fn remove(&self, id: &NodeId) -> Result<()> {
            self.nodes
                .lock()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found(id))
        }

        fn list(&self) -> Result<Vec<NodeState>> {
            Ok(self.nodes.lock().unwrap().values().cloned().collect())
        }
    }

    fn not_found(id: &NodeId) -> NexusError {
        NexusError::NotFound {
            kind: "node",
            id: id.to_string(),
        }
    }

    fn orchestrator(mock: MockRuntime) -> (tempfile::TempDir, Arc<MockRuntime>, NodeOrchestrator) {
        let rootfs = tempfile::tempdir().unwrap();
        let mock = Arc::new(mock);
        let defaults = NodeDefaults {
            rootfs: rootfs.path().to_path_buf(),
            ..NodeDefaults::default()
        };
        let orchestrator = NodeOrchestrator::new(Box::new(Arc::clone(&mock)), defaults);
        (rootfs, mock, orchestrator)
    }

    #[test]
    fn empty_name_is_rejected_before_the_runtime() {
        let (_rootfs, mock, orch) = orchestrator(MockRuntime::default());
        let err = orch.create_node("", 128, 512).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(mock.creates.lock().unwrap().is_empty());
    }

    #[test]
    fn create_fills_defaults_and_uses_name_as_hostname() {
        let (rootfs, mock, orch) = orchestrator(MockRuntime::default());
        let state = orch.create_node("web1", 128, 512).unwrap();
        assert_eq!(state.status, NodeStatus::Running);
        assert!(state.pid.is_some());

        let creates = mock.creates.lock().unwrap();
        let config = &creates[0];
        assert_eq!(config.hostname, "web1");
        assert_eq!(config.id.as_str(), "web1");
        assert_eq!(config.rootfs_path, rootfs.path());
        assert_eq!(config.command, vec!["/bin/sh", "-c", "sleep 3600"]);
        assert_eq!(config.memory_mb, 128);
        assert_eq!(config.cpu_shares, 512);
    }

    #[test]
    fn request_overrides_command() {
        let (_rootfs, mock, orch) = orchestrator(MockRuntime::default());
        let _ = orch
            .create_node_with(NodeRequest {
                name: "job".into(),
                command: Some(vec!["/bin/true".into()]),
                ..NodeRequest::default()
            })
            .unwrap();
        assert_eq!(mock.creates.lock().unwrap()[0].command, vec!["/bin/true"]);
    }

    #[test]
    fn runtime_errors_gain_context_without_losing_kind() {
        let mock = MockRuntime {
            fail_create: Some(|config| {
                NexusError::double_fault(
                    config.id.to_string(),
                    NexusError::Launch {
                        node: config.id.to_string(),
                        message: "exec failed".into(),
                    },
                    NexusError::validation("cgroup busy"),
                )
            }),
            ..MockRuntime::default()
        };
        let (_rootfs, _mock, orch) = orchestrator(mock);
        let err = orch.create_node("web1", 64, 0).unwrap_err();
        assert!(matches!(err, NexusError::Context { operation: "create", .. }));
        assert!(err.is_double_fault());
        assert!(err.to_string().contains("web1"));
    }

    #[test]
    fn duplicate_create_is_already_exists() {
        let (_rootfs, _mock, orch) = orchestrator(MockRuntime::default());
        let _ = orch.create_node("web1", 0, 0).unwrap();
        let err = orch.create_node("web1", 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn lifecycle_delegates_to_runtime() {
        let (_rootfs, _mock, orch) = orchestrator(MockRuntime::default());
        let _ = orch.create_node("web1", 0, 0).unwrap();
        assert_eq!(orch.stop_node("web1").unwrap(), StopOutcome::Stopped);
        assert_eq!(orch.stop_node("web1").unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(orch.node_state("web1").unwrap().status, NodeStatus::Stopped);
        assert_eq!(orch.list_nodes().unwrap().len(), 1);
        orch.remove_node("web1").unwrap();
        assert_eq!(orch.node_state("web1").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unknown_node_is_not_found_with_context() {
        let (_rootfs, _mock, orch) = orchestrator(MockRuntime::default());
        let err = orch.stop_node("ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("failed to stop node ghost"));
    }
}
