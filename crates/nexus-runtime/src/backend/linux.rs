//! Linux container runtime using namespaces and cgroups v2 directly.

use std::path::PathBuf;

use nexus_common::config::RuntimeConfig;
use nexus_common::error::{NexusError, Result};
use nexus_common::types::{NodeConfig, NodeId, NodeState, NodeStatus};
use nexus_core::cgroup::{ControllerReport, NodeCgroup, ResourceLimiter};
use nexus_core::profile::IsolationProfile;

use super::{ContainerRuntime, StopOutcome};
use crate::container::{Container, ContainerSpec, ProcessSpec};
use crate::process;
use crate::state::StateStore;

/// Runtime that isolates nodes with kernel primitives on the local host.
///
/// Holds no mutable state: every operation reads and writes the state
/// directory, so several runtimes (or processes) can share one host.
#[derive(Debug)]
pub struct LinuxRuntime {
    config: RuntimeConfig,
    store: StateStore,
    limiter: ResourceLimiter,
    report: ControllerReport,
    init_binary: PathBuf,
}

impl LinuxRuntime {
    /// Prepares the state root and the parent cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if either root cannot be created or the init binary
    /// cannot be located.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let store = StateStore::open(&config.state_root)?;
        let limiter = ResourceLimiter::new(&config.cgroup_root);
        let report = limiter.prepare_parent()?;
        let init_binary = match &config.init_binary {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|e| NexusError::Io {
                path: PathBuf::from("/proc/self/exe"),
                source: e,
            })?,
        };
        tracing::info!(
            state_root = %store.root().display(),
            cgroup_root = %limiter.root().display(),
            init_binary = %init_binary.display(),
            "runtime ready"
        );
        Ok(Self {
            config,
            store,
            limiter,
            report,
            init_binary,
        })
    }

    /// Controllers the parent cgroup delegated at startup.
    #[must_use]
    pub const fn controller_report(&self) -> &ControllerReport {
        &self.report
    }

    /// Returns `true` if the record's PID is live and still inside the
    /// node's cgroup. A PID that left the cgroup has been reused.
    fn node_alive(&self, state: &NodeState, cgroup: &NodeCgroup) -> bool {
        let Some(pid) = state.pid else {
            return false;
        };
        if !process::process_alive(pid) {
            return false;
        }
        match cgroup.holds(pid) {
            Some(false) => {
                tracing::warn!(id = %state.id(), pid, "pid no longer in node cgroup");
                false
            }
            Some(true) | None => true,
        }
    }

    /// Brings a loaded record in line with the process and cgroup it names,
    /// persisting any change.
    fn reconcile(&self, mut state: NodeState) -> Result<NodeState> {
        let cgroup = self.limiter.open_node(state.id());
        let alive = self.node_alive(&state, &cgroup);
        let cgroup_present = cgroup.exists();
        let observed = match state.status {
            NodeStatus::Running if !alive => NodeStatus::Stopped,
            NodeStatus::Running if !cgroup_present => NodeStatus::Error,
            NodeStatus::Created if !alive => NodeStatus::Error,
            recorded => recorded,
        };
        if observed != state.status {
            tracing::info!(
                id = %state.id(),
                recorded = %state.status,
                observed = %observed,
                "state reconciled"
            );
            state.status = observed;
            if observed == NodeStatus::Stopped {
                state.pid = None;
            }
            self.store.save(&state)?;
        }
        Ok(state)
    }
}

impl ContainerRuntime for LinuxRuntime {
    fn create_and_start(&self, config: &NodeConfig) -> Result<NodeState> {
        config.validate()?;
        tracing::info!(id = %config.id, hostname = %config.hostname, "creating node");

        let profile = IsolationProfile::build(config);
        let spec = ContainerSpec::new(config, profile, self.store.root())?;
        let mut container =
            Container::create(spec, config.clone(), &self.limiter, self.store.clone())?;

        let process = ProcessSpec::for_command(&config.command);
        match container.start(
            &process,
            &self.report,
            &self.init_binary,
            self.config.handshake_timeout(),
        ) {
            Ok(state) => Ok(state),
            Err(e) => Err(container.fail(e)),
        }
    }

    fn stop(&self, id: &NodeId) -> Result<StopOutcome> {
        let mut state = self.store.load(id)?;
        let cgroup = self.limiter.open_node(id);

        if !self.node_alive(&state, &cgroup) {
            if let Err(e) = cgroup.remove() {
                tracing::warn!(id = %id, error = %e, "leftover cgroup not removed");
            }
            if state.status != NodeStatus::Stopped || state.pid.is_some() {
                state.status = NodeStatus::Stopped;
                state.pid = None;
                self.store.save(&state)?;
            }
            tracing::debug!(id = %id, "node already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }

        if let Some(pid) = state.pid {
            let graceful = process::terminate(id.as_str(), pid, self.config.stop_timeout())?;
            tracing::info!(id = %id, pid, graceful, "node process exited");
        }
        cgroup.remove()?;

        state.status = NodeStatus::Stopped;
        state.pid = None;
        self.store.save(&state)?;
        tracing::info!(id = %id, "node stopped");
        Ok(StopOutcome::Stopped)
    }

    fn get_state(&self, id: &NodeId) -> Result<NodeState> {
        let state = self.store.load(id)?;
        self.reconcile(state)
    }

    fn remove(&self, id: &NodeId) -> Result<()> {
        let state = self.store.load(id)?;
        let cgroup = self.limiter.open_node(id);
        if let Some(pid) = state.pid.filter(|_| self.node_alive(&state, &cgroup)) {
            process::kill_and_reap(id.as_str(), pid)?;
        }
        cgroup.remove()?;
        self.store.release(id)?;
        tracing::info!(id = %id, "node removed");
        Ok(())
    }

    fn list(&self) -> Result<Vec<NodeState>> {
        let mut nodes = Vec::new();
        for id in self.store.ids()? {
            match self.store.load(&id).and_then(|s| self.reconcile(s)) {
                Ok(state) => nodes.push(state),
                // A directory claimed by an in-flight create has no record yet.
                Err(NexusError::NotFound { .. }) => {}
                Err(e) => tracing::warn!(id = %id, error = %e, "skipping unreadable node"),
            }
        }
        Ok(nodes)
    }
}
