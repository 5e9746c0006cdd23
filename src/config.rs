use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Process-wide memory limits consumed by the admission checks.
///
/// These are configuration: derived once at process start and read-only
/// afterwards. The soft pair (soft limit + warning water mark) throttles
/// ingestion early; the hard pair (hard limit + low water mark) refuses
/// allocation before the OS itself steps in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Total physical memory of the host, kept for diagnostics.
    pub physical_mem_bytes: i64,
    /// Hard process limit.
    pub mem_limit_bytes: i64,
    /// Soft process limit.
    pub soft_mem_limit_bytes: i64,
    /// Floor on system-available memory paired with the hard limit.
    pub sys_available_low_water_mark_bytes: i64,
    /// Floor on system-available memory paired with the soft limit.
    pub sys_available_warning_water_mark_bytes: i64,
}

const MEM_LIMIT_FRAC: f64 = 0.9;
const SOFT_MEM_LIMIT_FRAC: f64 = 0.9;
const LOW_WATER_MARK_FRAC: f64 = 0.05;
const MAX_LOW_WATER_MARK_BYTES: i64 = 6_871_947_673; // 6.4 GiB

impl MemoryLimits {
    /// Derive the standard limit shape from a physical-memory figure: hard
    /// limit at 90% of physical, soft limit at 90% of hard, low water mark at
    /// 5% of physical capped at 6.4 GiB, warning water mark at twice the low.
    pub fn for_physical_mem(physical_mem_bytes: i64) -> Self {
        let mem_limit = (physical_mem_bytes as f64 * MEM_LIMIT_FRAC) as i64;
        let soft_mem_limit = (mem_limit as f64 * SOFT_MEM_LIMIT_FRAC) as i64;
        let low_water_mark = ((physical_mem_bytes as f64 * LOW_WATER_MARK_FRAC) as i64)
            .min(MAX_LOW_WATER_MARK_BYTES)
            .max(0);
        Self {
            physical_mem_bytes,
            mem_limit_bytes: mem_limit,
            soft_mem_limit_bytes: soft_mem_limit,
            sys_available_low_water_mark_bytes: low_water_mark,
            sys_available_warning_water_mark_bytes: low_water_mark * 2,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.physical_mem_bytes <= 0 {
            bail!("physical_mem_bytes must be > 0");
        }
        if self.mem_limit_bytes <= 0 {
            bail!("mem_limit_bytes must be > 0");
        }
        if self.soft_mem_limit_bytes <= 0 || self.soft_mem_limit_bytes > self.mem_limit_bytes {
            bail!("soft_mem_limit_bytes must be in (0, mem_limit_bytes]");
        }
        if self.sys_available_low_water_mark_bytes < 0 {
            bail!("sys_available_low_water_mark_bytes must be >= 0");
        }
        if self.sys_available_warning_water_mark_bytes < self.sys_available_low_water_mark_bytes {
            bail!("sys_available_warning_water_mark_bytes must be >= low water mark");
        }
        Ok(())
    }
}

impl Default for MemoryLimits {
    fn default() -> Self {
        // Conservative fallback when the caller has not probed the host.
        Self::for_physical_mem(8 * 1024 * 1024 * 1024)
    }
}
