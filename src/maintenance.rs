use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::info;

/// Wake channel between memory-pressure producers and one periodic
/// maintenance consumer.
///
/// Producers call `notify` (non-blocking, safe from any thread); the consumer
/// loops on `wait_timeout`, so a lost wakeup can never stall it longer than
/// one period. Notifications arriving while the consumer is busy coalesce
/// into a single pending flag and cause exactly one extra reaction.
#[derive(Debug, Default)]
pub struct MaintenanceSignal {
    lock: Mutex<()>,
    cv: Condvar,
    pending: AtomicBool,
}

impl MaintenanceSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a pending reaction and wake the consumer.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Relaxed);
        self.cv.notify_all();
    }

    /// True when a notification is pending. Does not consume it.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed)
    }

    /// Consumer-side bounded wait. Returns true when a pending notification
    /// was consumed, false when `timeout` elapsed without one.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().expect("maintenance signal lock");
        loop {
            if self.pending.swap(false, Ordering::Relaxed) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (reacquired, res) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .expect("maintenance signal lock");
            guard = reacquired;
            if res.timed_out() {
                // Last look so a notify racing the timeout is not dropped.
                return self.pending.swap(false, Ordering::Relaxed);
            }
        }
    }
}

/// A periodic maintenance consumer: wakes every `period`, or immediately on
/// `signal.notify()`, and runs `tick` once per wake. `tick(true)` means the
/// wake was a notification, `tick(false)` a plain period expiry.
#[derive(Debug)]
pub struct MaintenanceTask {
    running: Arc<AtomicBool>,
    signal: Arc<MaintenanceSignal>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    pub fn spawn<F>(
        name: &str,
        signal: Arc<MaintenanceSignal>,
        period: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_signal = signal.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                info!("maintenance task {} started", thread_name);
                while thread_running.load(Ordering::Relaxed) {
                    let notified = thread_signal.wait_timeout(period);
                    if !thread_running.load(Ordering::Relaxed) {
                        break;
                    }
                    tick(notified);
                }
                info!("maintenance task {} stopped", thread_name);
            })
            .expect("spawn maintenance task");
        Self {
            running,
            signal,
            handle: Some(handle),
        }
    }

    /// Stop the loop and join the thread. Prompt: the signal is notified so
    /// the consumer does not sleep out its period first.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.signal.notify();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn notifications_coalesce_into_one_wake() {
        let signal = MaintenanceSignal::new();
        signal.notify();
        signal.notify();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_times_out_without_notify() {
        let signal = MaintenanceSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn notify_wakes_waiting_thread_promptly() {
        let signal = Arc::new(MaintenanceSignal::new());
        let waiter_signal = signal.clone();
        let waiter = thread::spawn(move || waiter_signal.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        signal.notify();
        assert!(waiter.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn task_reacts_once_per_notification_burst() {
        let signal = Arc::new(MaintenanceSignal::new());
        let notified_ticks = Arc::new(AtomicUsize::new(0));
        let counter = notified_ticks.clone();
        let mut task = MaintenanceTask::spawn(
            "burst-test",
            signal.clone(),
            Duration::from_secs(60),
            move |notified| {
                if notified {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                thread::sleep(Duration::from_millis(100));
            },
        );
        for _ in 0..5 {
            signal.notify();
        }
        thread::sleep(Duration::from_millis(400));
        task.stop();
        let reactions = notified_ticks.load(Ordering::Relaxed);
        assert!(
            (1..=2).contains(&reactions),
            "burst of 5 notifies caused {} reactions",
            reactions
        );
    }

    #[test]
    fn stop_is_prompt_despite_long_period() {
        let signal = Arc::new(MaintenanceSignal::new());
        let mut task = MaintenanceTask::spawn("stop-test", signal, Duration::from_secs(60), |_| {});
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        task.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
