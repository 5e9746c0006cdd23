use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tracing::{info, warn};

use crate::arbiter::MemoryArbiter;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// One resident/available reading pair, as supplied by the OS sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Resident set size of this process.
    pub resident_bytes: i64,
    /// System-wide available memory.
    pub sys_available_bytes: i64,
}

/// Where snapshots come from. Implementations run on the sampler thread.
pub trait SnapshotSource: Send {
    fn capture(&mut self) -> anyhow::Result<MemorySnapshot>;
}

/// `sysinfo`-backed source reading the current process RSS and the system
/// available-memory figure.
pub struct SysinfoSource {
    system: System,
    pid: Pid,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(RefreshKind::everything()),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SysinfoSource {
    fn capture(&mut self) -> anyhow::Result<MemorySnapshot> {
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow::anyhow!("own process {} not visible", self.pid))?;
        Ok(MemorySnapshot {
            resident_bytes: process.memory() as i64,
            sys_available_bytes: self.system.available_memory() as i64,
        })
    }
}

/// Background thread keeping a [`MemoryArbiter`] fed with fresh samples.
///
/// Each cycle: capture, install the sample, reset the growth counter, re-arm
/// the exceeded-diagnostic log, refresh the stats gauges. A failed capture
/// leaves the previous sample in effect.
#[derive(Debug)]
pub struct MemorySampler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MemorySampler {
    pub fn spawn<S>(arbiter: Arc<MemoryArbiter>, mut source: S, interval: Duration) -> Self
    where
        S: SnapshotSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("memory-sampler".to_string())
            .spawn(move || {
                info!("memory sampler started");
                while thread_running.load(Ordering::Relaxed) {
                    match source.capture() {
                        Ok(sample) => {
                            arbiter.apply_sample(sample);
                            arbiter.reset_refresh_interval_memory_growth();
                            arbiter.enable_process_usage_log();
                            arbiter.refresh_memory_stats();
                        }
                        Err(e) => warn!("memory sample capture failed: {e:#}"),
                    }
                    thread::sleep(interval);
                }
                info!("memory sampler stopped");
            })
            .expect("spawn memory sampler");
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// [`Self::spawn`] with [`DEFAULT_SAMPLE_INTERVAL`].
    pub fn spawn_default<S>(arbiter: Arc<MemoryArbiter>, source: S) -> Self
    where
        S: SnapshotSource + 'static,
    {
        Self::spawn(arbiter, source, DEFAULT_SAMPLE_INTERVAL)
    }

    /// Stop the loop and join the thread. Blocks for at most one interval.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.stop();
    }
}
