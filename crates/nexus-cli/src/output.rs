//! Formatted output helpers for CLI commands.
//!
//! Provides the node table and human-readable limit formatting.

use nexus_common::types::NodeState;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Formats a byte count into a human-readable string (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a node's memory budget; non-positive budgets are unlimited.
#[must_use]
pub fn format_memory(memory_mb: i64) -> String {
    u64::try_from(memory_mb)
        .ok()
        .filter(|mb| *mb > 0)
        .map_or_else(
            || "unlimited".to_string(),
            |mb| format_bytes(mb.saturating_mul(BYTES_PER_MIB)),
        )
}

fn format_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "-".to_string(), |p| p.to_string())
}

/// Prints the confirmation for a freshly started node.
pub fn print_created(state: &NodeState) {
    println!(
        "Started {} (pid {}, memory {}, cpu shares {})",
        state.id(),
        format_pid(state.pid),
        format_memory(state.config.memory_mb),
        state.config.cpu_shares
    );
}

/// Prints one node in key/value form.
pub fn print_state(state: &NodeState) {
    println!("{:<10} {}", "ID", state.id());
    println!("{:<10} {}", "STATUS", state.status);
    println!("{:<10} {}", "PID", format_pid(state.pid));
    println!("{:<10} {}", "HOSTNAME", state.config.hostname);
    println!("{:<10} {}", "MEMORY", format_memory(state.config.memory_mb));
    println!("{:<10} {}", "CPU", state.config.cpu_shares);
    println!("{:<10} {}", "ROOTFS", state.config.rootfs_path.display());
    println!("{:<10} {}", "COMMAND", state.config.command.join(" "));
    println!("{:<10} {}", "CREATED", state.created_at);
}

/// Prints nodes as a table.
pub fn print_table(nodes: &[NodeState]) {
    println!(
        "{:<24} {:<10} {:<8} {:<12} {:<6} {:<26}",
        "NODE", "STATUS", "PID", "MEMORY", "CPU", "CREATED"
    );
    for n in nodes {
        println!(
            "{:<24} {:<10} {:<8} {:<12} {:<6} {:<26}",
            n.id(),
            n.status,
            format_pid(n.pid),
            format_memory(n.config.memory_mb),
            n.config.cpu_shares,
            n.created_at
        );
    }
}
