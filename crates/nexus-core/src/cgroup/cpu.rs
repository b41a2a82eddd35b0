//! CPU resource control via cgroups v2.
//!
//! Manages `cpu.weight`. Node budgets are expressed in cgroup v1 shares and
//! converted here.

use std::path::Path;

use super::write_cgroup_file;

/// File holding the relative CPU weight.
pub const CPU_WEIGHT: &str = "cpu.weight";

const MAX_CPU_WEIGHT: u64 = 10_000;

/// Converts cgroup v1 CPU shares (2..=262144) to a cgroup v2 weight (1..=10000).
///
/// Zero maps to zero, meaning "leave the kernel default in place".
#[must_use]
pub const fn shares_to_weight(shares: u64) -> u64 {
    if shares == 0 {
        return 0;
    }
    let weight = 1 + shares.saturating_sub(2).saturating_mul(9999) / 262_142;
    if weight > MAX_CPU_WEIGHT {
        MAX_CPU_WEIGHT
    } else {
        weight
    }
}

/// Sets the CPU weight for a cgroup from a share value.
///
/// Returns the weight written, or `None` if `shares` is zero and nothing
/// was written.
///
/// # Errors
///
/// Returns an error if writing to `cpu.weight` fails.
pub fn set_cpu_shares(cgroup_path: &Path, shares: u64) -> std::io::Result<Option<u64>> {
    let weight = shares_to_weight(shares);
    if weight == 0 {
        return Ok(None);
    }
    write_cgroup_file(&cgroup_path.join(CPU_WEIGHT), &weight.to_string())?;
    tracing::debug!(shares, weight, "CPU weight set");
    Ok(Some(weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_convert_to_weight() {
        assert_eq!(shares_to_weight(0), 0);
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(1024), 39);
        assert_eq!(shares_to_weight(512), 20);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(u64::MAX), MAX_CPU_WEIGHT);
    }

    #[test]
    fn zero_shares_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(set_cpu_shares(dir.path(), 0).unwrap(), None);
        assert!(!dir.path().join(CPU_WEIGHT).exists());
    }
}
