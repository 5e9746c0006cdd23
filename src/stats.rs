use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Admission-control statistics for debugging and tuning.
///
/// Not wired to any metrics backend; callers snapshot and export however
/// they like.
#[derive(Debug, Default)]
pub struct ArbiterStats {
    // Gauges, refreshed once per sampler cycle.
    vm_rss_bytes: AtomicI64,
    sys_mem_available_bytes: AtomicI64,
    process_reserved_bytes: AtomicI64,
    interval_growth_bytes: AtomicI64,
    process_memory_usage_bytes: AtomicI64,

    // Admission outcomes.
    soft_limit_exceeded: AtomicU64,
    hard_limit_exceeded: AtomicU64,
    reserve_rejected: AtomicU64,

    // Collaborator activity.
    samples_applied: AtomicU64,
    cache_adjust_notified: AtomicU64,
    memtable_refresh_notified: AtomicU64,
}

impl ArbiterStats {
    pub fn set_memory_gauges(
        &self,
        vm_rss: i64,
        sys_mem_available: i64,
        reserved: i64,
        growth: i64,
        usage: i64,
    ) {
        self.vm_rss_bytes.store(vm_rss, Ordering::Relaxed);
        self.sys_mem_available_bytes
            .store(sys_mem_available, Ordering::Relaxed);
        self.process_reserved_bytes.store(reserved, Ordering::Relaxed);
        self.interval_growth_bytes.store(growth, Ordering::Relaxed);
        self.process_memory_usage_bytes.store(usage, Ordering::Relaxed);
    }

    pub fn on_soft_limit_exceeded(&self) {
        self.soft_limit_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_hard_limit_exceeded(&self) {
        self.hard_limit_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_reserve_rejected(&self) {
        self.reserve_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_sample_applied(&self) {
        self.samples_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_cache_adjust_notified(&self) {
        self.cache_adjust_notified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_memtable_refresh_notified(&self) {
        self.memtable_refresh_notified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples_applied(&self) -> u64 {
        self.samples_applied.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ArbiterStatsSnapshot {
        ArbiterStatsSnapshot {
            vm_rss_bytes: self.vm_rss_bytes.load(Ordering::Relaxed),
            sys_mem_available_bytes: self.sys_mem_available_bytes.load(Ordering::Relaxed),
            process_reserved_bytes: self.process_reserved_bytes.load(Ordering::Relaxed),
            interval_growth_bytes: self.interval_growth_bytes.load(Ordering::Relaxed),
            process_memory_usage_bytes: self.process_memory_usage_bytes.load(Ordering::Relaxed),
            soft_limit_exceeded: self.soft_limit_exceeded.load(Ordering::Relaxed),
            hard_limit_exceeded: self.hard_limit_exceeded.load(Ordering::Relaxed),
            reserve_rejected: self.reserve_rejected.load(Ordering::Relaxed),
            samples_applied: self.samples_applied.load(Ordering::Relaxed),
            cache_adjust_notified: self.cache_adjust_notified.load(Ordering::Relaxed),
            memtable_refresh_notified: self.memtable_refresh_notified.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ArbiterStats`], serializable for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterStatsSnapshot {
    pub vm_rss_bytes: i64,
    pub sys_mem_available_bytes: i64,
    pub process_reserved_bytes: i64,
    pub interval_growth_bytes: i64,
    pub process_memory_usage_bytes: i64,
    pub soft_limit_exceeded: u64,
    pub hard_limit_exceeded: u64,
    pub reserve_rejected: u64,
    pub samples_applied: u64,
    pub cache_adjust_notified: u64,
    pub memtable_refresh_notified: u64,
}

/// Human-readable byte count for log lines, two decimals, largest unit first.
pub fn format_bytes(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes < 0 {
        return format!("-{}", format_bytes(bytes.saturating_neg()));
    }
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
