//! System-wide constants and default paths.

/// Directory holding one state subdirectory per node.
pub const DEFAULT_STATE_ROOT: &str = "/run/nexus";

/// Parent cgroup under which every node receives a leaf cgroup.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/nexus";

/// Name of the state record file inside a node's state directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Root filesystem used when a creation request does not name one.
pub const DEFAULT_ROOTFS: &str = "/var/lib/nexus/images/alpine-base";

/// Long-running placeholder command used when a request does not name one.
pub const DEFAULT_COMMAND: [&str; 3] = ["/bin/sh", "-c", "sleep 3600"];

/// The only environment variable handed to a node process.
pub const NODE_PATH_ENV: &str = "PATH=/bin:/usr/bin:/sbin:/usr/sbin";

/// Environment variable naming the inherited init channel descriptor.
pub const INIT_FD_ENV: &str = "NEXUS_INIT_FD";

/// Descriptor number the init channel is duplicated onto in the child.
pub const INIT_FD: i32 = 3;

/// Hidden subcommand that runs the second stage of node creation.
pub const INIT_SUBCOMMAND: &str = "init";

/// Grace period between SIGTERM and SIGKILL when stopping a node.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

/// Time the parent waits for the init stage to report back.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Maximum hostname length accepted by `sethostname(2)`.
pub const HOST_NAME_MAX: usize = 64;

/// Maximum node ID length.
pub const NODE_ID_MAX: usize = 253;

/// Application name used in CLI output.
pub const APP_NAME: &str = "nexus";
