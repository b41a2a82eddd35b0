//! Core container struct and lifecycle operations.
//!
//! A [`Container`] ties together a node's cgroup, its state directory, and
//! (once started) its process. It exists only for the duration of a create
//! call; later operations work from the persisted record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nexus_common::constants::NODE_PATH_ENV;
use nexus_common::error::{NexusError, Result};
use nexus_common::types::{NodeConfig, NodeId, NodeState, NodeStatus, ResourceLimits};
use nexus_core::cgroup::{ControllerReport, NodeCgroup, ResourceLimiter};
use nexus_core::profile::IsolationProfile;
use serde::{Deserialize, Serialize};

use crate::channel::InitMessage;
use crate::process::{self, SpawnedInit};
use crate::state::StateStore;

/// Everything the init stage needs to isolate a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Node identifier.
    pub id: NodeId,
    /// Root filesystem to pivot into.
    pub rootfs: PathBuf,
    /// Namespaces, capabilities, mounts, and hostname.
    pub profile: IsolationProfile,
    /// Cgroup limits.
    pub limits: ResourceLimits,
    /// State directory of the node on the host.
    pub state_dir: PathBuf,
}

impl ContainerSpec {
    /// Builds the spec for `config` with its state directory under `state_root`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the memory limit overflows.
    pub fn new(config: &NodeConfig, profile: IsolationProfile, state_root: &Path) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            rootfs: config.rootfs_path.clone(),
            profile,
            limits: config.limits()?,
            state_dir: state_root.join(config.id.as_str()),
        })
    }
}

/// The process exec'd as the node's PID 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// argv; the first element is the executable.
    pub args: Vec<String>,
    /// Complete environment, as `KEY=value` pairs.
    pub env: Vec<String>,
}

impl ProcessSpec {
    /// Builds a process running `command` with only `PATH` set.
    #[must_use]
    pub fn for_command(command: &[String]) -> Self {
        Self {
            args: command.to_vec(),
            env: vec![NODE_PATH_ENV.to_string()],
        }
    }
}

/// A node under construction.
#[derive(Debug)]
pub struct Container {
    spec: ContainerSpec,
    cgroup: NodeCgroup,
    store: StateStore,
    state: NodeState,
}

impl Container {
    /// Claims the node's state directory, creates its leaf cgroup, and
    /// records it as `Created`.
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::AlreadyExists`] if another node holds the ID.
    /// The cgroup is never touched in that case: it belongs to the holder.
    pub fn create(
        spec: ContainerSpec,
        config: NodeConfig,
        limiter: &ResourceLimiter,
        store: StateStore,
    ) -> Result<Self> {
        let _ = store.claim(&spec.id)?;
        let cgroup = match limiter.create_node(&spec.id) {
            Ok(cgroup) => cgroup,
            Err(e) => {
                return Err(match store.release(&spec.id) {
                    Ok(()) => e,
                    Err(cleanup) => NexusError::double_fault(spec.id.to_string(), e, cleanup),
                });
            }
        };
        let container = Self {
            spec,
            cgroup,
            store,
            state: NodeState::new(config),
        };
        if let Err(e) = container.store.save(&container.state) {
            return Err(container.fail(e));
        }
        tracing::info!(id = %container.spec.id, "container created");
        Ok(container)
    }

    /// Returns the container spec.
    #[must_use]
    pub const fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Applies limits, spawns the init stage, and waits until it has exec'd
    /// the node command. On success the record is persisted as `Running`.
    ///
    /// On failure the caller should pass the error to [`fail`](Self::fail).
    ///
    /// # Errors
    ///
    /// Returns an error if any setup step, the handshake, or the exec fails.
    pub fn start(
        &mut self,
        process: &ProcessSpec,
        report: &ControllerReport,
        init_binary: &Path,
        handshake_timeout: Duration,
    ) -> Result<NodeState> {
        let node = self.spec.id.to_string();
        let _ = self.cgroup.apply_limits(&self.spec.limits, report)?;

        let SpawnedInit { pid, mut channel } = process::spawn_init(
            &node,
            init_binary,
            self.spec.profile.namespaces.clone_flags(),
        )?;
        self.state.pid = Some(pid);

        self.cgroup.add_process(pid)?;
        let launch = |message: String| NexusError::Launch {
            node: node.clone(),
            message,
        };
        channel
            .set_timeout(handshake_timeout)
            .map_err(|e| launch(format!("init channel timeout: {e}")))?;
        channel
            .send(&InitMessage::Config {
                container: self.spec.clone(),
                process: process.clone(),
            })
            .map_err(|e| launch(format!("send config: {e}")))?;
        process::await_exec(&node, &mut channel, handshake_timeout)?;

        self.state.status = NodeStatus::Running;
        self.store.save(&self.state)?;
        tracing::info!(id = %node, pid, "container started");
        Ok(self.state.clone())
    }

    /// Releases everything this container holds: its process, its cgroup,
    /// and its state directory, in that order.
    ///
    /// The state directory is kept when the cgroup cannot be removed, so
    /// the record stays visible for remediation.
    ///
    /// # Errors
    ///
    /// Returns the first failure that prevented cleanup.
    pub fn destroy(&self) -> Result<()> {
        let node = self.spec.id.as_str();
        if let Some(pid) = self.state.pid {
            process::kill_and_reap(node, pid)?;
        }
        self.cgroup.remove()?;
        self.store.release(&self.spec.id)?;
        tracing::info!(id = %node, "container destroyed");
        Ok(())
    }

    /// Destroys the container after `original` failed creation.
    ///
    /// Returns `original` when cleanup succeeds. Otherwise marks the record
    /// `Error` where possible and returns a double fault carrying both errors.
    #[must_use]
    pub fn fail(mut self, original: NexusError) -> NexusError {
        tracing::warn!(id = %self.spec.id, error = %original, "creation failed, cleaning up");
        match self.destroy() {
            Ok(()) => original,
            Err(cleanup) => {
                tracing::error!(
                    id = %self.spec.id,
                    error = %cleanup,
                    "cleanup failed, manual remediation required"
                );
                self.state.status = NodeStatus::Error;
                if let Err(e) = self.store.save(&self.state) {
                    tracing::warn!(id = %self.spec.id, error = %e, "could not record error state");
                }
                NexusError::double_fault(self.spec.id.to_string(), original, cleanup)
            }
        }
    }
}
