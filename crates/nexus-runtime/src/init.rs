//! Second stage of node creation, run inside the new namespaces.
//!
//! The runtime clones a child into fresh PID, mount, UTS, IPC, and network
//! namespaces and re-execs itself as `nexus init`. This module is that
//! entry point: it receives the node configuration over the inherited
//! channel, finishes isolation from the inside, and execs the node command.
//! Nothing here may run on more than one thread: namespace and mount
//! changes apply per thread, and exec must not race another thread.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nexus_common::constants::NODE_PATH_ENV;
use nexus_common::error::{NexusError, Result};
use nexus_core::capability;
use nexus_core::filesystem::{mount, pivot_root};
use nexus_core::namespace::{self, uts};
use procfs::process::Process;
use tracing_subscriber::EnvFilter;

use crate::channel::{InitChannel, InitMessage};
use crate::container::{ContainerSpec, ProcessSpec};

/// Runs the init stage. Returns only on failure; success replaces the
/// process image with the node command.
///
/// # Errors
///
/// Returns the error that stopped setup or exec. By then it has been
/// reported to the parent when the channel was still usable.
pub fn run() -> Result<Infallible> {
    ensure_single_threaded()?;
    install_logging();

    let mut channel = InitChannel::inherited()?;
    let (container, process) = match channel.recv() {
        Ok(Some(InitMessage::Config { container, process })) => (container, process),
        Ok(other) => {
            return Err(NexusError::Protocol {
                message: format!("expected Config, got {other:?}"),
            });
        }
        Err(e) => {
            return Err(NexusError::Protocol {
                message: format!("receive config: {e}"),
            });
        }
    };
    let node = container.id.to_string();
    tracing::debug!(node = %node, "init stage configured");

    if let Err(e) = isolate(&container) {
        let stage = match &e {
            NexusError::ResourceSetup { stage, .. } => *stage,
            _ => "init",
        };
        let _ = channel.send(&InitMessage::SetupFailed {
            stage: stage.to_string(),
            reason: e.to_string(),
        });
        return Err(e);
    }

    channel.send(&InitMessage::Ready).map_err(|e| NexusError::Protocol {
        message: format!("send ready: {e}"),
    })?;
    let mut channel = channel.into_cloexec().map_err(|e| NexusError::Protocol {
        message: format!("mark channel close-on-exec: {e}"),
    })?;

    let err = exec(&node, &process);
    let _ = channel.send(&InitMessage::ExecFailed(err.to_string()));
    Err(err)
}

/// Refuses to continue unless this process has exactly one thread.
fn ensure_single_threaded() -> Result<()> {
    let threads = Process::myself()
        .and_then(|p| p.stat())
        .map(|stat| stat.num_threads)
        .map_err(|e| NexusError::Protocol {
            message: format!("read /proc/self/stat: {e}"),
        })?;
    if threads == 1 {
        Ok(())
    } else {
        Err(NexusError::Protocol {
            message: format!("init stage must be single-threaded, found {threads} threads"),
        })
    }
}

fn install_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Applies the node's isolation profile from inside its namespaces.
fn isolate(container: &ContainerSpec) -> Result<()> {
    let node = container.id.as_str();
    let profile = &container.profile;

    namespace::enter_deferred(node, &profile.namespaces)?;
    uts::set_hostname(node, &profile.hostname)?;
    mount::make_root_private(node)?;
    mount::bind_rootfs(node, &container.rootfs)?;
    mount::mount_table(node, &container.rootfs, &profile.mounts)?;
    pivot_root::pivot_root(node, &container.rootfs)?;
    capability::restrict_bounding_set(node, &profile.capabilities)?;

    tracing::info!(node, "isolation complete");
    Ok(())
}

/// Execs the node command. Only returns on failure.
fn exec(node: &str, process: &ProcessSpec) -> NexusError {
    let launch = |message: String| NexusError::Launch {
        node: node.to_string(),
        message,
    };
    let Some(program) = process.args.first() else {
        return launch("empty command".into());
    };

    let path = resolve_executable(program, &search_path(&process.env));
    let Ok(path_c) = CString::new(path.as_os_str().as_bytes()) else {
        return launch(format!("executable path {} contains NUL", path.display()));
    };
    let args: std::result::Result<Vec<CString>, _> =
        process.args.iter().map(|a| CString::new(a.as_str())).collect();
    let env: std::result::Result<Vec<CString>, _> =
        process.env.iter().map(|e| CString::new(e.as_str())).collect();
    let (Ok(args), Ok(env)) = (args, env) else {
        return launch("command or environment contains NUL".into());
    };

    tracing::debug!(node, path = %path.display(), "exec node command");
    match nix::unistd::execve(&path_c, &args, &env) {
        Err(e) => launch(format!("exec {}: {e}", path.display())),
        Ok(never) => match never {},
    }
}

/// Directories named by the `PATH` entry of `env`, or the node default.
fn search_path(env: &[String]) -> Vec<PathBuf> {
    let default = NODE_PATH_ENV.trim_start_matches("PATH=");
    let value = env
        .iter()
        .find_map(|e| e.strip_prefix("PATH="))
        .unwrap_or(default);
    value
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Resolves a bare program name against `dirs`. Names containing `/` are
/// used as given; unresolved names are returned unchanged so exec reports
/// the failure.
fn resolve_executable(program: &str, dirs: &[PathBuf]) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }
    dirs.iter()
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .unwrap_or_else(|| PathBuf::from(program))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn search_path_comes_from_env() {
        let dirs = search_path(&["PATH=/opt/bin:/bin".to_string()]);
        assert_eq!(dirs, vec![PathBuf::from("/opt/bin"), PathBuf::from("/bin")]);
    }

    #[test]
    fn search_path_falls_back_to_node_default() {
        let dirs = search_path(&[]);
        assert_eq!(
            dirs,
            ["/bin", "/usr/bin", "/sbin", "/usr/sbin"]
                .iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn bare_names_resolve_to_the_first_executable_match() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a");
        let second = dir.path().join("b");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();

        fs::write(first.join("tool"), "").unwrap();
        fs::set_permissions(first.join("tool"), fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(second.join("tool"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(second.join("tool"), fs::Permissions::from_mode(0o755)).unwrap();

        let resolved = resolve_executable("tool", &[first, second.clone()]);
        assert_eq!(resolved, second.join("tool"));
    }

    #[test]
    fn paths_and_unknown_names_are_left_alone() {
        assert_eq!(
            resolve_executable("/bin/sh", &[PathBuf::from("/usr/bin")]),
            PathBuf::from("/bin/sh")
        );
        assert_eq!(
            resolve_executable("no-such-tool", &[PathBuf::from("/nonexistent")]),
            PathBuf::from("no-such-tool")
        );
    }

    #[test]
    fn exec_with_empty_command_is_a_launch_error() {
        let process = ProcessSpec {
            args: Vec::new(),
            env: vec![NODE_PATH_ENV.to_string()],
        };
        let err = exec("web1", &process);
        assert_eq!(err.kind(), nexus_common::error::ErrorKind::Launch);
    }
}
