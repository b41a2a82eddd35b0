//! Cgroups v2 resource management.
//!
//! The [`ResourceLimiter`] owns a fixed parent cgroup (by default
//! `/sys/fs/cgroup/nexus`) and creates one leaf per node beneath it.
//! Controllers are delegated to the parent one at a time so a restricted
//! host still gets partial enforcement, and the outcome of every attempt is
//! kept in a [`ControllerReport`].

pub mod cpu;
pub mod memory;

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nexus_common::error::{NexusError, Result};
use nexus_common::types::{NodeId, ResourceLimits};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";
const CGROUP_PROCS: &str = "cgroup.procs";
const CGROUP_KILL: &str = "cgroup.kill";

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_BACKOFF: Duration = Duration::from_millis(50);

/// A cgroup v2 controller delegated to node cgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controller {
    /// CPU weight.
    Cpu,
    /// Memory limit.
    Memory,
    /// Process count accounting.
    Pids,
}

/// Controllers enabled on the parent cgroup, in activation order.
pub const PARENT_CONTROLLERS: [Controller; 3] =
    [Controller::Cpu, Controller::Memory, Controller::Pids];

impl Controller {
    /// Kernel name of the controller.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Pids => "pids",
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregated result of delegating controllers to the parent cgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Every controller was enabled.
    Full,
    /// Some controllers could not be enabled.
    Partial {
        /// Controllers that failed to activate.
        missing: Vec<Controller>,
    },
    /// No controller could be enabled.
    Failed,
}

/// Per-controller outcome of parent cgroup preparation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerReport {
    results: Vec<(Controller, Option<String>)>,
}

impl ControllerReport {
    /// Records the outcome of enabling one controller.
    pub fn record(&mut self, controller: Controller, outcome: std::io::Result<()>) {
        self.results
            .push((controller, outcome.err().map(|e| e.to_string())));
    }

    /// Controllers that were enabled.
    #[must_use]
    pub fn enabled(&self) -> Vec<Controller> {
        self.results
            .iter()
            .filter(|(_, err)| err.is_none())
            .map(|(c, _)| *c)
            .collect()
    }

    /// Controllers that failed, with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (Controller, &str)> {
        self.results
            .iter()
            .filter_map(|(c, err)| err.as_deref().map(|e| (*c, e)))
    }

    /// Returns `true` if `controller` was enabled.
    #[must_use]
    pub fn is_enabled(&self, controller: Controller) -> bool {
        self.results
            .iter()
            .any(|(c, err)| *c == controller && err.is_none())
    }

    /// Collapses the per-controller results into a single outcome.
    #[must_use]
    pub fn outcome(&self) -> ActivationOutcome {
        let missing: Vec<Controller> = self.failures().map(|(c, _)| c).collect();
        if missing.is_empty() {
            ActivationOutcome::Full
        } else if missing.len() == self.results.len() {
            ActivationOutcome::Failed
        } else {
            ActivationOutcome::Partial { missing }
        }
    }
}

/// Creates and configures node cgroups under a fixed parent.
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    root: PathBuf,
}

impl ResourceLimiter {
    /// Creates a limiter rooted at `root`. Nothing is touched until
    /// [`prepare_parent`](Self::prepare_parent) is called.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the parent cgroup path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the cgroup path of node `id`.
    #[must_use]
    pub fn node_path(&self, id: &NodeId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Creates the parent cgroup and delegates controllers to its children.
    ///
    /// Each controller is written to `cgroup.subtree_control` separately; a
    /// failure is recorded in the report and never blocks the others.
    ///
    /// # Errors
    ///
    /// Returns an error only if the parent directory cannot be created.
    pub fn prepare_parent(&self) -> Result<ControllerReport> {
        std::fs::create_dir_all(&self.root).map_err(|e| NexusError::Io {
            path: self.root.clone(),
            source: e,
        })?;

        let subtree_control = self.root.join(CGROUP_SUBTREE_CONTROL);
        let mut report = ControllerReport::default();
        for controller in PARENT_CONTROLLERS {
            let outcome = write_cgroup_file(&subtree_control, &format!("+{controller}"));
            if let Err(e) = &outcome {
                tracing::warn!(%controller, error = %e, "controller not delegated");
            }
            report.record(controller, outcome);
        }

        match report.outcome() {
            ActivationOutcome::Full => {
                tracing::info!(path = %self.root.display(), "parent cgroup ready");
            }
            ActivationOutcome::Partial { missing } => tracing::warn!(
                path = %self.root.display(),
                enabled = ?report.enabled(),
                ?missing,
                "parent cgroup ready with partial enforcement"
            ),
            ActivationOutcome::Failed => tracing::warn!(
                path = %self.root.display(),
                "parent cgroup ready without resource enforcement"
            ),
        }
        Ok(report)
    }

    /// Creates the leaf cgroup for node `id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a resource setup error if the directory cannot be created.
    pub fn create_node(&self, id: &NodeId) -> Result<NodeCgroup> {
        let path = self.node_path(id);
        let created = match std::fs::create_dir(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
            Err(e) => {
                return Err(NexusError::ResourceSetup {
                    node: id.to_string(),
                    stage: "cgroup",
                    message: format!("create {}: {e}", path.display()),
                });
            }
        };
        tracing::info!(id = %id, path = %path.display(), created, "node cgroup ready");
        Ok(NodeCgroup {
            node: id.to_string(),
            path,
        })
    }

    /// Returns a handle to the existing cgroup of node `id`.
    #[must_use]
    pub fn open_node(&self, id: &NodeId) -> NodeCgroup {
        NodeCgroup {
            node: id.to_string(),
            path: self.node_path(id),
        }
    }
}

/// Handle to a node's leaf cgroup.
#[derive(Debug, Clone)]
pub struct NodeCgroup {
    node: String,
    path: PathBuf,
}

impl NodeCgroup {
    /// Path to this node's cgroup directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the directory still exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Applies resource limits for every controller the parent delegated.
    ///
    /// Unlimited memory is written as `max`; zero CPU shares leave the
    /// default weight. Returns the controllers that were skipped because
    /// the parent could not delegate them.
    ///
    /// # Errors
    ///
    /// Returns a resource setup error if a delegated controller rejects its value.
    pub fn apply_limits(
        &self,
        limits: &ResourceLimits,
        report: &ControllerReport,
    ) -> Result<Vec<Controller>> {
        let mut skipped = Vec::new();

        if report.is_enabled(Controller::Memory) {
            memory::set_memory_max(&self.path, limits.memory_bytes)
                .map_err(|e| self.setup_error(memory::MEMORY_MAX, &e))?;
        } else if limits.memory_bytes.is_some() {
            skipped.push(Controller::Memory);
        }

        if let Some(shares) = limits.cpu_shares {
            if report.is_enabled(Controller::Cpu) {
                let _ = cpu::set_cpu_shares(&self.path, shares)
                    .map_err(|e| self.setup_error(cpu::CPU_WEIGHT, &e))?;
            } else {
                skipped.push(Controller::Cpu);
            }
        }

        if !skipped.is_empty() {
            tracing::warn!(node = %self.node, ?skipped, "limits not enforced");
        }
        Ok(skipped)
    }

    /// Moves `pid` into this cgroup.
    ///
    /// # Errors
    ///
    /// Returns a resource setup error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        write_cgroup_file(&self.path.join(CGROUP_PROCS), &pid.to_string())
            .map_err(|e| self.setup_error(CGROUP_PROCS, &e))?;
        tracing::debug!(node = %self.node, pid, "added process to cgroup");
        Ok(())
    }

    /// Returns the PIDs currently in this cgroup.
    #[must_use]
    pub fn procs(&self) -> Vec<i32> {
        std::fs::read_to_string(self.path.join(CGROUP_PROCS))
            .map(|content| content.lines().filter_map(|l| l.trim().parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Returns whether `pid` is a member, or `None` if membership cannot be read.
    #[must_use]
    pub fn holds(&self, pid: u32) -> Option<bool> {
        let content = std::fs::read_to_string(self.path.join(CGROUP_PROCS)).ok()?;
        Some(content.lines().any(|l| l.trim().parse::<u32>() == Ok(pid)))
    }

    /// Kills remaining members and removes the cgroup. A missing cgroup is success.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory still cannot be removed after retrying.
    pub fn remove(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.kill_members();
        delete_with_retry(&self.path).map_err(|e| NexusError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::info!(node = %self.node, path = %self.path.display(), "cgroup removed");
        Ok(())
    }

    fn kill_members(&self) {
        let kill_file = self.path.join(CGROUP_KILL);
        if kill_file.exists() {
            if let Err(e) = write_cgroup_file(&kill_file, "1") {
                tracing::warn!(node = %self.node, error = %e, "cgroup.kill failed");
            }
            return;
        }
        for pid in self.procs() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }

    fn setup_error(&self, file: &str, e: &std::io::Error) -> NexusError {
        NexusError::ResourceSetup {
            node: self.node.clone(),
            stage: "cgroup",
            message: format!("write {}: {e}", self.path.join(file).display()),
        }
    }
}

/// Writes `value` to a cgroup interface file.
pub(crate) fn write_cgroup_file(path: &Path, value: &str) -> std::io::Result<()> {
    std::fs::write(path, value)
}

fn delete_with_retry(path: &Path) -> std::io::Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match std::fs::remove_dir(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            // Interface files of a real cgroup vanish with rmdir; a plain
            // directory standing in for one has to be emptied first.
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                return std::fs::remove_dir_all(path);
            }
            Err(e) if attempt >= REMOVE_ATTEMPTS => return Err(e),
            Err(_) => std::thread::sleep(REMOVE_BACKOFF * attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> (tempfile::TempDir, ResourceLimiter) {
        let dir = tempfile::tempdir().unwrap();
        let limiter = ResourceLimiter::new(dir.path().join("nexus"));
        (dir, limiter)
    }

    fn full_report() -> ControllerReport {
        let mut report = ControllerReport::default();
        for c in PARENT_CONTROLLERS {
            report.record(c, Ok(()));
        }
        report
    }

    #[test]
    fn prepare_parent_enables_each_controller() {
        let (_dir, limiter) = limiter();
        let report = limiter.prepare_parent().unwrap();
        assert_eq!(report.outcome(), ActivationOutcome::Full);
        assert_eq!(report.enabled(), PARENT_CONTROLLERS.to_vec());
        assert!(limiter.root().is_dir());
    }

    #[test]
    fn prepare_parent_reports_failed_controllers_instead_of_erroring() {
        let (_dir, limiter) = limiter();
        std::fs::create_dir_all(limiter.root().join(CGROUP_SUBTREE_CONTROL)).unwrap();
        let report = limiter.prepare_parent().unwrap();
        assert_eq!(report.outcome(), ActivationOutcome::Failed);
        assert_eq!(report.failures().count(), 3);
    }

    #[test]
    fn partial_activation_names_missing_controllers() {
        let mut report = ControllerReport::default();
        report.record(Controller::Cpu, Err(std::io::Error::from(ErrorKind::PermissionDenied)));
        report.record(Controller::Memory, Ok(()));
        report.record(Controller::Pids, Ok(()));
        assert_eq!(
            report.outcome(),
            ActivationOutcome::Partial {
                missing: vec![Controller::Cpu]
            }
        );
        assert!(report.is_enabled(Controller::Memory));
        assert!(!report.is_enabled(Controller::Cpu));
    }

    #[test]
    fn create_node_is_idempotent() {
        let (_dir, limiter) = limiter();
        let _ = limiter.prepare_parent().unwrap();
        let id = NodeId::new("web1").unwrap();
        let first = limiter.create_node(&id).unwrap();
        let second = limiter.create_node(&id).unwrap();
        assert_eq!(first.path(), second.path());
        assert_eq!(first.path(), limiter.root().join("web1"));
    }

    #[test]
    fn holds_checks_procs_membership() {
        let (_dir, limiter) = limiter();
        let _ = limiter.prepare_parent().unwrap();
        let cgroup = limiter.create_node(&NodeId::new("web1").unwrap()).unwrap();
        assert_eq!(cgroup.holds(42), None);

        cgroup.add_process(42).unwrap();
        assert_eq!(cgroup.holds(42), Some(true));
        assert_eq!(cgroup.holds(4), Some(false));
    }

    #[test]
    fn create_node_without_parent_is_a_setup_error() {
        let (_dir, limiter) = limiter();
        let err = limiter.create_node(&NodeId::new("web1").unwrap()).unwrap_err();
        assert_eq!(err.kind(), nexus_common::error::ErrorKind::ResourceSetup);
    }

    #[test]
    fn limits_are_written_to_interface_files() {
        let (_dir, limiter) = limiter();
        let _ = limiter.prepare_parent().unwrap();
        let cgroup = limiter.create_node(&NodeId::new("web1").unwrap()).unwrap();
        let limits = ResourceLimits {
            memory_bytes: Some(128 * 1024 * 1024),
            cpu_shares: Some(512),
        };
        let skipped = cgroup.apply_limits(&limits, &full_report()).unwrap();
        assert!(skipped.is_empty());
        let mem = std::fs::read_to_string(cgroup.path().join(memory::MEMORY_MAX)).unwrap();
        let weight = std::fs::read_to_string(cgroup.path().join(cpu::CPU_WEIGHT)).unwrap();
        assert_eq!(mem, "134217728");
        assert_eq!(weight, "20");
    }

    #[test]
    fn unlimited_memory_is_written_as_max() {
        let (_dir, limiter) = limiter();
        let _ = limiter.prepare_parent().unwrap();
        let cgroup = limiter.create_node(&NodeId::new("web1").unwrap()).unwrap();
        let _ = cgroup
            .apply_limits(&ResourceLimits::default(), &full_report())
            .unwrap();
        let mem = std::fs::read_to_string(cgroup.path().join(memory::MEMORY_MAX)).unwrap();
        assert_eq!(mem, "max");
        assert!(!cgroup.path().join(cpu::CPU_WEIGHT).exists());
    }

    #[test]
    fn limits_for_missing_controllers_are_skipped() {
        let (_dir, limiter) = limiter();
        let _ = limiter.prepare_parent().unwrap();
        let cgroup = limiter.create_node(&NodeId::new("web1").unwrap()).unwrap();
        let mut report = ControllerReport::default();
        report.record(Controller::Cpu, Ok(()));
        report.record(Controller::Memory, Err(std::io::Error::from(ErrorKind::PermissionDenied)));
        let limits = ResourceLimits {
            memory_bytes: Some(1024),
            cpu_shares: Some(1024),
        };
        let skipped = cgroup.apply_limits(&limits, &report).unwrap();
        assert_eq!(skipped, vec![Controller::Memory]);
        assert!(!cgroup.path().join(memory::MEMORY_MAX).exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, limiter) = limiter();
        let _ = limiter.prepare_parent().unwrap();
        let cgroup = limiter.create_node(&NodeId::new("web1").unwrap()).unwrap();
        let _ = cgroup
            .apply_limits(&ResourceLimits::default(), &full_report())
            .unwrap();
        cgroup.remove().unwrap();
        assert!(!cgroup.exists());
        cgroup.remove().unwrap();
    }
}
