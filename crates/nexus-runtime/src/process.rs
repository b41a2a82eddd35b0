//! Process spawning inside isolated namespaces.
//!
//! The first stage `clone(2)`s a child into fresh namespaces. The child does
//! nothing but move its end of the init channel onto a fixed descriptor and
//! re-exec the runtime binary in init mode; every allocation it needs is
//! made before the clone. The rest of this module probes and signals node
//! processes from the host side.

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use nexus_common::constants::{APP_NAME, INIT_FD, INIT_FD_ENV, INIT_SUBCOMMAND};
use nexus_common::error::{NexusError, Result};
use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use procfs::process::{ProcState, Process};

use crate::channel::{InitChannel, InitMessage, is_timeout};

const CLONE_STACK_SIZE: usize = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit status of the cloned child when it could not exec the init binary.
const EXEC_FAILED_STATUS: isize = 127;

/// A freshly cloned init stage, waiting for its configuration.
#[derive(Debug)]
pub struct SpawnedInit {
    /// Host-visible PID of the child.
    pub pid: u32,
    /// Parent end of the init channel.
    pub channel: InitChannel,
}

/// Clones a child into the namespaces in `flags` and re-execs `init_binary`
/// in init mode inside them.
///
/// # Errors
///
/// Returns a launch error if the channel cannot be created, the init
/// arguments contain NUL bytes, or `clone(2)` fails.
pub fn spawn_init(node: &str, init_binary: &Path, flags: CloneFlags) -> Result<SpawnedInit> {
    let launch = |message: String| NexusError::Launch {
        node: node.to_string(),
        message,
    };

    let (parent, child) =
        UnixStream::pair().map_err(|e| launch(format!("init channel: {e}")))?;
    let child_fd = child.as_raw_fd();

    let path = CString::new(init_binary.as_os_str().as_bytes())
        .map_err(|e| launch(format!("init binary path: {e}")))?;
    let argv = [cstring(APP_NAME)?, cstring(INIT_SUBCOMMAND)?];
    let mut envp = vec![cstring(&format!("{INIT_FD_ENV}={INIT_FD}"))?];
    if let Ok(filter) = std::env::var("RUST_LOG") {
        envp.push(cstring(&format!("RUST_LOG={filter}"))?);
    }
    let argv_ptrs = null_terminated(&argv);
    let envp_ptrs = null_terminated(&envp);

    let mut stack = vec![0u8; CLONE_STACK_SIZE];
    let callback = Box::new(|| {
        // SAFETY: only async-signal-safe libc calls on memory prepared
        // before the clone. The child gets a copy of the address space, so
        // the pointers stay valid until execve replaces it.
        unsafe {
            if child_fd == INIT_FD {
                if libc::fcntl(INIT_FD, libc::F_SETFD, 0) < 0 {
                    return EXEC_FAILED_STATUS;
                }
            } else if libc::dup2(child_fd, INIT_FD) < 0 {
                return EXEC_FAILED_STATUS;
            }
            let _ = libc::execve(path.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
        }
        EXEC_FAILED_STATUS
    });

    // SAFETY: the callback performs no allocation and touches no locks;
    // SIGCHLD makes the child reapable through waitpid.
    let pid = unsafe { nix::sched::clone(callback, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| launch(format!("clone({flags:?}): {e}")))?;
    drop(child);

    let pid = u32::try_from(pid.as_raw()).map_err(|e| launch(format!("child pid: {e}")))?;
    tracing::info!(node, pid, binary = %init_binary.display(), "init stage cloned");
    Ok(SpawnedInit {
        pid,
        channel: InitChannel::new(parent),
    })
}

/// Waits for the init stage to report `Ready` and then exec the node command.
///
/// The channel must already carry a read timeout.
///
/// # Errors
///
/// Returns a resource setup error if the init stage reports a failed setup
/// step, and a launch error if it reports a failed exec, closes the channel
/// before `Ready`, or stays silent past the timeout.
pub fn await_exec(node: &str, channel: &mut InitChannel, timeout: Duration) -> Result<()> {
    let launch = |message: String| NexusError::Launch {
        node: node.to_string(),
        message,
    };
    let receive = |channel: &mut InitChannel, phase: &str| {
        channel.recv().map_err(|e| {
            if is_timeout(&e) {
                launch(format!("init stage silent for {timeout:?} while {phase}"))
            } else {
                NexusError::Protocol {
                    message: format!("{phase}: {e}"),
                }
            }
        })
    };

    match receive(channel, "setting up")? {
        Some(InitMessage::Ready) => {}
        Some(InitMessage::SetupFailed { stage, reason }) => {
            return Err(NexusError::ResourceSetup {
                node: node.to_string(),
                stage: "init",
                message: format!("{stage}: {reason}"),
            });
        }
        Some(InitMessage::ExecFailed(reason)) => return Err(launch(reason)),
        Some(InitMessage::Config { .. }) => {
            return Err(NexusError::Protocol {
                message: "init stage echoed a Config message".into(),
            });
        }
        None => return Err(launch("init stage exited before reporting ready".into())),
    }

    match receive(channel, "exec'ing")? {
        None => Ok(()),
        Some(InitMessage::ExecFailed(reason)) => Err(launch(reason)),
        Some(other) => Err(NexusError::Protocol {
            message: format!("unexpected {other:?} after Ready"),
        }),
    }
}

/// Returns `true` if `pid` names a live, non-zombie process.
///
/// Reaps the process if it is an exited child of the caller. Processes
/// spawned by another runtime invocation are probed through `/proc`.
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match waitpid(Pid::from_raw(raw), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => true,
        Ok(status) => {
            tracing::debug!(pid, ?status, "reaped node process");
            false
        }
        Err(_) => probe_proc(raw),
    }
}

fn probe_proc(pid: i32) -> bool {
    match Process::new(pid).and_then(|p| p.stat()) {
        Ok(stat) => !matches!(stat.state(), Ok(ProcState::Zombie | ProcState::Dead)),
        Err(_) => false,
    }
}

/// Stops `pid`: SIGTERM, a grace period polled every 50 ms, then SIGKILL.
///
/// Returns `true` if the process exited within the grace period.
///
/// # Errors
///
/// Returns an error if the process survives SIGKILL past the reap timeout.
pub fn terminate(node: &str, pid: u32, grace: Duration) -> Result<bool> {
    let target = as_pid(pid)?;
    match kill(target, Signal::SIGTERM) {
        Ok(()) => tracing::info!(node, pid, "sent SIGTERM"),
        Err(Errno::ESRCH) => return Ok(true),
        Err(e) => tracing::warn!(pid, error = %e, "SIGTERM failed"),
    }
    if wait_for_exit(pid, grace) {
        return Ok(true);
    }
    kill_and_reap(node, pid)?;
    Ok(false)
}

/// Sends SIGKILL to `pid` and waits until it is gone.
///
/// # Errors
///
/// Returns an error if the process is still alive after the reap timeout.
pub fn kill_and_reap(node: &str, pid: u32) -> Result<()> {
    let target = as_pid(pid)?;
    match kill(target, Signal::SIGKILL) {
        Ok(()) => tracing::info!(node, pid, "sent SIGKILL"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "SIGKILL failed"),
    }
    if wait_for_exit(pid, REAP_TIMEOUT) {
        Ok(())
    } else {
        Err(NexusError::Launch {
            node: node.to_string(),
            message: format!("process {pid} survived SIGKILL for {REAP_TIMEOUT:?}"),
        })
    }
}

/// Polls until `pid` is gone or `timeout` elapses. Returns `true` if it exited.
#[must_use]
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn as_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| NexusError::validation(format!("invalid pid {pid}")))
}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|e| NexusError::validation(format!("{value:?}: {e}")))
}

fn null_terminated(values: &[CString]) -> Vec<*const libc::c_char> {
    values
        .iter()
        .map(|v| v.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}
