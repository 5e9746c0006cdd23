use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use memory_arbiter::{
    MaintenanceTask, MemoryArbiter, MemoryLimits, MemorySampler, MemorySnapshot,
    OperatorReservation, SnapshotSource,
};

/// Snapshot source driven by the test instead of the OS.
#[derive(Clone)]
struct ScriptedSource {
    resident: Arc<AtomicI64>,
    available: Arc<AtomicI64>,
}

impl SnapshotSource for ScriptedSource {
    fn capture(&mut self) -> anyhow::Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            resident_bytes: self.resident.load(Ordering::Relaxed),
            sys_available_bytes: self.available.load(Ordering::Relaxed),
        })
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn test_limits() -> MemoryLimits {
    MemoryLimits {
        physical_mem_bytes: 1_000_000,
        mem_limit_bytes: 900_000,
        soft_mem_limit_bytes: 800_000,
        sys_available_low_water_mark_bytes: 20_000,
        sys_available_warning_water_mark_bytes: 40_000,
    }
}

#[test]
fn admission_flow_under_memory_spike() {
    let arbiter = MemoryArbiter::new(test_limits());
    let resident = Arc::new(AtomicI64::new(100_000));
    let available = Arc::new(AtomicI64::new(700_000));
    let source = ScriptedSource {
        resident: resident.clone(),
        available: available.clone(),
    };
    let mut sampler = MemorySampler::spawn(arbiter.clone(), source, Duration::from_millis(10));
    wait_until(|| arbiter.stats().samples_applied() >= 1);

    // Cache maintenance consumer applying the capacity weights on each wake.
    let reactions = Arc::new(AtomicUsize::new(0));
    let task_reactions = reactions.clone();
    let task_arbiter = arbiter.clone();
    let mut task = MaintenanceTask::spawn(
        "cache-capacity-adjust",
        arbiter.cache_adjust_signal(),
        Duration::from_secs(60),
        move |_notified| {
            task_arbiter.cache_capacity().recombine();
            task_reactions.fetch_add(1, Ordering::Relaxed);
        },
    );

    // Plenty of headroom: a query pre-reserves and allocates against its own
    // credit without touching the global checks.
    let reservation = OperatorReservation::try_new(&arbiter, 50_000).unwrap();
    assert_eq!(arbiter.process_reserved_memory(), 50_000);
    assert!(!arbiter.is_exceed_soft_mem_limit_with(&reservation, 30_000));
    assert_eq!(arbiter.process_reserved_memory(), 20_000);

    // Resident memory spikes close to the soft limit.
    resident.store(790_000, Ordering::Relaxed);
    wait_until(|| arbiter.vm_rss() == 790_000);
    assert!(arbiter.is_exceed_soft_mem_limit(0));
    assert!(!arbiter.is_exceed_hard_mem_limit(0));

    // Workload management reacts: flag the exceed state, shrink cache
    // capacity, and wake the maintenance task ahead of its period.
    arbiter.set_any_workload_group_exceed_limit(true);
    arbiter.cache_capacity().set_exceeded_weight(0.5);
    arbiter.notify_cache_adjust_capacity();
    wait_until(|| reactions.load(Ordering::Relaxed) >= 1);
    assert_eq!(arbiter.cache_capacity().affected_weight(), 0.5);

    // The query's remaining private credit still admits its allocations even
    // though the process-wide estimate is exceeded.
    assert!(!arbiter.is_exceed_soft_mem_limit_with(&reservation, 10_000));

    // New reservations are refused while the spike lasts.
    assert!(OperatorReservation::try_new(&arbiter, 50_000).is_none());

    // Memory drains, the exceed state clears, reservations work again.
    resident.store(100_000, Ordering::Relaxed);
    wait_until(|| arbiter.vm_rss() == 100_000);
    assert!(!arbiter.is_exceed_soft_mem_limit(0));
    arbiter.set_any_workload_group_exceed_limit(false);
    arbiter.cache_capacity().set_exceeded_weight(1.0);
    arbiter.notify_cache_adjust_capacity();
    wait_until(|| arbiter.cache_capacity().affected_weight() == 1.0);

    // Winding down returns the unspent credit to the ledger.
    reservation.release_to(&arbiter);
    assert_eq!(arbiter.process_reserved_memory(), 0);

    let snap = arbiter.stats().snapshot();
    assert!(snap.soft_limit_exceeded >= 1);
    assert!(snap.reserve_rejected >= 1);
    assert!(snap.cache_adjust_notified >= 2);

    task.stop();
    sampler.stop();
}

#[test]
fn tight_system_memory_rejects_reservations() {
    let arbiter = MemoryArbiter::new(test_limits());
    let source = ScriptedSource {
        resident: Arc::new(AtomicI64::new(100_000)),
        available: Arc::new(AtomicI64::new(45_000)),
    };
    let mut sampler = MemorySampler::spawn(arbiter.clone(), source, Duration::from_millis(10));
    wait_until(|| arbiter.stats().samples_applied() >= 1);

    // 45_000 available - 10_000 lands under the 40_000 warning mark, even
    // though usage is nowhere near the soft limit.
    assert!(!arbiter.try_reserve_process_memory(10_000));
    assert_eq!(arbiter.process_reserved_memory(), 0);
    assert!(arbiter.is_exceed_soft_mem_limit(10_000));
    assert!(!arbiter.is_exceed_hard_mem_limit(10_000));

    sampler.stop();
}
