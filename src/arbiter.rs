use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::capacity::CacheCapacityWeights;
use crate::config::MemoryLimits;
use crate::maintenance::MaintenanceSignal;
use crate::reservation::ReservationHolder;
use crate::sampler::MemorySnapshot;
use crate::stats::{format_bytes, ArbiterStats};

/// Which limit/water-mark pair an admission check evaluates.
#[derive(Debug, Clone, Copy)]
enum LimitKind {
    Soft,
    Hard,
}

/// Process-wide memory admission control.
///
/// One instance per process, shared as `Arc<MemoryArbiter>` by query
/// execution, background maintenance and the OS sampler. All counters are
/// independent relaxed atomics read and written without a shared lock, so
/// callers may observe usage and reservation at slightly different instants.
/// That is fine: the whole structure is a bounded-error estimator layered on
/// a periodic resident-memory sample, not an exact ledger, and the water
/// marks absorb the skew.
#[derive(Debug)]
pub struct MemoryArbiter {
    limits: MemoryLimits,

    // Latest sampler readings.
    vm_rss: AtomicI64,
    sys_mem_available: AtomicI64,

    // Memory allocated since the last resident-memory sample, not yet visible
    // in it. May go negative when frees are tracked too. Reset once per
    // sampler cycle.
    refresh_interval_memory_growth: AtomicI64,

    // Memory promised to in-flight operations but not necessarily resident
    // yet. Clamped at zero on subtraction.
    process_reserved_memory: AtomicI64,

    any_workload_group_exceed_limit: AtomicBool,

    // One-shot arming for the exceeded-diagnostic log line, re-armed by the
    // sampler so a burst of failed admissions logs once per cycle.
    usage_log_armed: AtomicBool,

    cache_capacity: CacheCapacityWeights,
    cache_adjust_signal: Arc<MaintenanceSignal>,
    memtable_refresh_signal: Arc<MaintenanceSignal>,

    stats: Arc<ArbiterStats>,
}

impl MemoryArbiter {
    pub fn new(limits: MemoryLimits) -> Arc<Self> {
        Self::new_with_stats(limits, Arc::new(ArbiterStats::default()))
    }

    pub fn new_with_stats(limits: MemoryLimits, stats: Arc<ArbiterStats>) -> Arc<Self> {
        Arc::new(Self {
            limits,
            vm_rss: AtomicI64::new(0),
            sys_mem_available: AtomicI64::new(0),
            refresh_interval_memory_growth: AtomicI64::new(0),
            process_reserved_memory: AtomicI64::new(0),
            any_workload_group_exceed_limit: AtomicBool::new(false),
            usage_log_armed: AtomicBool::new(true),
            cache_capacity: CacheCapacityWeights::new(),
            cache_adjust_signal: Arc::new(MaintenanceSignal::new()),
            memtable_refresh_signal: Arc::new(MaintenanceSignal::new()),
            stats,
        })
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    pub fn stats(&self) -> &Arc<ArbiterStats> {
        &self.stats
    }

    // ----------------- sampler interface -----------------

    /// Install the sampler's latest resident/available readings. Until the
    /// first sample lands the arbiter sees zero available memory and fails
    /// admission closed.
    pub fn apply_sample(&self, sample: MemorySnapshot) {
        self.vm_rss.store(sample.resident_bytes, Ordering::Relaxed);
        self.sys_mem_available
            .store(sample.sys_available_bytes, Ordering::Relaxed);
        self.stats.on_sample_applied();
    }

    /// Latest resident-set sample, without estimator deltas.
    pub fn vm_rss(&self) -> i64 {
        self.vm_rss.load(Ordering::Relaxed)
    }

    /// Track memory allocated (or freed, with negative `bytes`) since the
    /// last sample.
    pub fn add_refresh_interval_memory_growth(&self, bytes: i64) {
        self.refresh_interval_memory_growth
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Called once per sampler cycle, right after a fresh sample lands: the
    /// growth tracked so far is now part of the resident figure.
    pub fn reset_refresh_interval_memory_growth(&self) {
        self.refresh_interval_memory_growth.store(0, Ordering::Relaxed);
    }

    pub fn refresh_interval_memory_growth(&self) -> i64 {
        self.refresh_interval_memory_growth.load(Ordering::Relaxed)
    }

    /// Re-arm the exceeded-diagnostic log. Called once per sampler cycle.
    pub fn enable_process_usage_log(&self) {
        self.usage_log_armed.store(true, Ordering::Relaxed);
    }

    /// Copy the current figures into the stats gauges. Called once per
    /// sampler cycle.
    pub fn refresh_memory_stats(&self) {
        self.stats.set_memory_gauges(
            self.vm_rss(),
            self.sys_mem_available(),
            self.process_reserved_memory(),
            self.refresh_interval_memory_growth(),
            self.process_memory_usage(),
        );
    }

    // ----------------- usage accounting -----------------

    /// Best-effort current process usage: the resident sample plus growth not
    /// yet visible in it plus all promised reservations. A deliberate
    /// over-estimate.
    pub fn process_memory_usage(&self) -> i64 {
        self.vm_rss.load(Ordering::Relaxed)
            + self.refresh_interval_memory_growth.load(Ordering::Relaxed)
            + self.process_reserved_memory()
    }

    /// Best-effort system headroom: the sampler's available reading minus the
    /// same two deltas. A deliberate under-estimate.
    pub fn sys_mem_available(&self) -> i64 {
        self.sys_mem_available.load(Ordering::Relaxed)
            - self.refresh_interval_memory_growth.load(Ordering::Relaxed)
            - self.process_reserved_memory()
    }

    pub fn process_reserved_memory(&self) -> i64 {
        self.process_reserved_memory.load(Ordering::Relaxed)
    }

    // ----------------- reservation ledger -----------------

    /// Unconditionally promise `bytes` to the caller. Used when some other
    /// policy already decided the reservation is warranted.
    pub fn reserve_process_memory(&self, bytes: i64) -> bool {
        self.process_reserved_memory.fetch_add(bytes, Ordering::Relaxed);
        true
    }

    /// Promise `bytes` only while the soft thresholds hold with the proposed
    /// ledger value. The limit check is recomputed inside the CAS loop so
    /// concurrent reservations cannot stack past the soft limit through the
    /// ledger itself; the sys-available precheck stays a plain racy read
    /// whose error is bounded by the warning-water-mark margin.
    pub fn try_reserve_process_memory(&self, bytes: i64) -> bool {
        if self.sys_mem_available() - bytes < self.limits.sys_available_warning_water_mark_bytes {
            self.stats.on_reserve_rejected();
            return false;
        }
        let mut old_reserved = self.process_reserved_memory.load(Ordering::Relaxed);
        loop {
            let new_reserved = old_reserved + bytes;
            if self.vm_rss.load(Ordering::Relaxed)
                + self.refresh_interval_memory_growth.load(Ordering::Relaxed)
                + new_reserved
                >= self.limits.soft_mem_limit_bytes
            {
                self.stats.on_reserve_rejected();
                return false;
            }
            match self.process_reserved_memory.compare_exchange_weak(
                old_reserved,
                new_reserved,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => old_reserved = observed,
            }
        }
    }

    /// Give promised memory back, or account it as materialized into the
    /// resident figure. Excess subtraction is absorbed at zero; a negative
    /// ledger has no meaning.
    pub fn shrink_process_reserved(&self, bytes: i64) {
        let mut old_reserved = self.process_reserved_memory.load(Ordering::Relaxed);
        loop {
            let new_reserved = (old_reserved - bytes).max(0);
            match self.process_reserved_memory.compare_exchange_weak(
                old_reserved,
                new_reserved,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => old_reserved = observed,
            }
        }
    }

    /// Spend up to `bytes` of the calling operation's own reservation.
    ///
    /// Whatever the holder gives up leaves the shared ledger too: that memory
    /// is about to materialize as real resident usage, so the promise no
    /// longer needs to hold the budget open. Returns the shortfall
    /// `bytes - consumed`; a value `<= 0` means the private credit fully
    /// covers the request and no global check is needed, even while the
    /// process-wide estimate looks exceeded because the sample has not caught
    /// up with reality yet.
    pub fn sub_thread_reserve_memory<R>(&self, reservation: &R, bytes: i64) -> i64
    where
        R: ReservationHolder + ?Sized,
    {
        let consumed = reservation.consume(bytes);
        if consumed > 0 {
            self.shrink_process_reserved(consumed);
        }
        bytes - consumed
    }

    // ----------------- limit evaluation -----------------

    fn exceeds_limit(&self, kind: LimitKind, bytes: i64) -> bool {
        let (limit, water_mark) = match kind {
            LimitKind::Soft => (
                self.limits.soft_mem_limit_bytes,
                self.limits.sys_available_warning_water_mark_bytes,
            ),
            LimitKind::Hard => (
                self.limits.mem_limit_bytes,
                self.limits.sys_available_low_water_mark_bytes,
            ),
        };
        let exceeded = self.process_memory_usage() + bytes >= limit
            || self.sys_mem_available() - bytes < water_mark;
        if exceeded {
            match kind {
                LimitKind::Soft => self.stats.on_soft_limit_exceeded(),
                LimitKind::Hard => self.stats.on_hard_limit_exceeded(),
            }
            self.log_process_usage();
        }
        exceeded
    }

    /// Would admitting `bytes` more cross the soft limit or the warning water
    /// mark? This is the throttling decision point; `bytes` may be zero for a
    /// plain "are we over" probe.
    pub fn is_exceed_soft_mem_limit(&self, bytes: i64) -> bool {
        self.exceeds_limit(LimitKind::Soft, bytes)
    }

    /// [`Self::is_exceed_soft_mem_limit`] with the caller's reservation as a
    /// fast accept path: when the holder covers `bytes` in full, the global
    /// check is skipped entirely.
    pub fn is_exceed_soft_mem_limit_with<R>(&self, reservation: &R, bytes: i64) -> bool
    where
        R: ReservationHolder + ?Sized,
    {
        if bytes > 0 && self.sub_thread_reserve_memory(reservation, bytes) <= 0 {
            return false;
        }
        self.exceeds_limit(LimitKind::Soft, bytes)
    }

    /// Would admitting `bytes` more cross the hard limit or the low water
    /// mark? Past this point allocation must be refused outright.
    pub fn is_exceed_hard_mem_limit(&self, bytes: i64) -> bool {
        self.exceeds_limit(LimitKind::Hard, bytes)
    }

    /// [`Self::is_exceed_hard_mem_limit`] with the caller's reservation as a
    /// fast accept path.
    pub fn is_exceed_hard_mem_limit_with<R>(&self, reservation: &R, bytes: i64) -> bool
    where
        R: ReservationHolder + ?Sized,
    {
        if bytes > 0 && self.sub_thread_reserve_memory(reservation, bytes) <= 0 {
            return false;
        }
        self.exceeds_limit(LimitKind::Hard, bytes)
    }

    // ----------------- workload-group flag -----------------

    /// Last-writer-wins flag consulted by query admission, owned by the
    /// workload-group manager.
    pub fn set_any_workload_group_exceed_limit(&self, exceeded: bool) {
        self.any_workload_group_exceed_limit
            .store(exceeded, Ordering::Relaxed);
    }

    pub fn any_workload_group_exceed_limit(&self) -> bool {
        self.any_workload_group_exceed_limit.load(Ordering::Relaxed)
    }

    // ----------------- maintenance collaborators -----------------

    pub fn cache_capacity(&self) -> &CacheCapacityWeights {
        &self.cache_capacity
    }

    pub fn cache_adjust_signal(&self) -> Arc<MaintenanceSignal> {
        self.cache_adjust_signal.clone()
    }

    pub fn memtable_refresh_signal(&self) -> Arc<MaintenanceSignal> {
        self.memtable_refresh_signal.clone()
    }

    /// Wake the cache-capacity maintenance task ahead of its period.
    pub fn notify_cache_adjust_capacity(&self) {
        self.cache_adjust_signal.notify();
        self.stats.on_cache_adjust_notified();
    }

    /// Wake the memtable-memory maintenance task ahead of its period.
    pub fn notify_memtable_memory_refresh(&self) {
        self.memtable_refresh_signal.notify();
        self.stats.on_memtable_refresh_notified();
    }

    // ----------------- diagnostics -----------------

    fn log_process_usage(&self) {
        if self.usage_log_armed.swap(false, Ordering::Relaxed) {
            warn!("process memory summary: {}", self.process_mem_log_str());
        }
    }

    pub fn process_memory_used_str(&self) -> String {
        Self::tag(format!(
            "process memory used {}",
            format_bytes(self.process_memory_usage())
        ))
    }

    pub fn process_memory_used_details_str(&self) -> String {
        Self::tag(format!(
            "process memory used {}(= {}[vm/rss] + {}[reserved] + {}B[waiting_refresh])",
            format_bytes(self.process_memory_usage()),
            format_bytes(self.vm_rss()),
            format_bytes(self.process_reserved_memory()),
            self.refresh_interval_memory_growth(),
        ))
    }

    pub fn sys_mem_available_str(&self) -> String {
        Self::tag(format!(
            "sys available memory {}",
            format_bytes(self.sys_mem_available())
        ))
    }

    pub fn sys_mem_available_details_str(&self) -> String {
        Self::tag(format!(
            "sys available memory {}(= {}[proc/available] - {}[reserved] - {}B[waiting_refresh])",
            format_bytes(self.sys_mem_available()),
            format_bytes(self.sys_mem_available.load(Ordering::Relaxed)),
            format_bytes(self.process_reserved_memory()),
            self.refresh_interval_memory_growth(),
        ))
    }

    /// The full line the exceeded-diagnostic log emits.
    pub fn process_mem_log_str(&self) -> String {
        format!(
            "sys physical memory {}. {}, limit {}, soft limit {}. {}, low water mark {}, warning water mark {}",
            format_bytes(self.limits.physical_mem_bytes),
            self.process_memory_used_details_str(),
            format_bytes(self.limits.mem_limit_bytes),
            format_bytes(self.limits.soft_mem_limit_bytes),
            self.sys_mem_available_details_str(),
            format_bytes(self.limits.sys_available_low_water_mark_bytes),
            format_bytes(self.limits.sys_available_warning_water_mark_bytes),
        )
    }

    #[cfg(feature = "memory-debug")]
    fn tag(msg: String) -> String {
        format!("[memory-debug]{}", msg)
    }

    #[cfg(not(feature = "memory-debug"))]
    fn tag(msg: String) -> String {
        msg
    }
}
