//! Background expiry of idle client state.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Weak;
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::shard::SweepReport;
use crate::error::{LimiterError, Result};

/// Upper bound on the time between sweeps.
pub const JANITOR_TICK: Duration = Duration::from_secs(60);
/// Lower bound on the time between sweeps.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Something the janitor can sweep.
pub(crate) trait Sweep: Send + Sync {
    fn sweep(&self) -> SweepReport;
}

/// Sweep interval for a given TTL: `min(JANITOR_TICK, ttl / 2)`.
pub fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 2).min(JANITOR_TICK).max(MIN_TICK)
}

/// Where the janitor loop runs.
enum Host {
    /// A task on the caller's Tokio runtime
    Task(JoinHandle<()>),
    /// A dedicated thread driving its own single-threaded runtime
    Thread(thread::JoinHandle<()>),
}

impl Host {
    fn is_finished(&self) -> bool {
        match self {
            Host::Task(handle) => handle.is_finished(),
            Host::Thread(handle) => handle.is_finished(),
        }
    }
}

/// Handle to a running janitor.
///
/// The loop holds only a weak reference to its target and exits once the
/// target is gone, [`stop`](Janitor::stop) is called, or this handle is
/// dropped (which closes the shutdown channel).
pub(crate) struct Janitor {
    limiter: String,
    shutdown: watch::Sender<bool>,
    host: Mutex<Option<Host>>,
}

impl Janitor {
    /// Start a janitor for `target`.
    ///
    /// Inside a Tokio runtime the loop is spawned as a task on it. Outside
    /// one it gets a dedicated thread, so limiters also work for purely
    /// thread-based callers.
    pub fn spawn(target: Weak<dyn Sweep>, interval: Duration, limiter: String) -> Result<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = run(target, interval, limiter.clone(), shutdown_rx);

        let host = match Handle::try_current() {
            Ok(runtime) => Host::Task(runtime.spawn(task)),
            Err(_) => Host::Thread(spawn_thread(&limiter, task)?),
        };

        Ok(Self {
            limiter,
            shutdown,
            host: Mutex::new(Some(host)),
        })
    }

    /// Name of the limiter this janitor sweeps.
    pub fn limiter(&self) -> &str {
        &self.limiter
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let host = self.host.lock().take();
        let panicked = match host {
            None => false,
            Some(Host::Task(handle)) => match handle.await {
                Ok(()) => false,
                Err(e) => e.is_panic(),
            },
            Some(Host::Thread(handle)) => match Handle::try_current() {
                Ok(runtime) => match runtime.spawn_blocking(move || handle.join()).await {
                    Ok(joined) => joined.is_err(),
                    Err(e) => e.is_panic(),
                },
                Err(_) => handle.join().is_err(),
            },
        };
        if panicked {
            error!(limiter = %self.limiter, "Janitor panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.host
            .lock()
            .as_ref()
            .map(|host| !host.is_finished())
            .unwrap_or(false)
    }
}

/// Drive `task` to completion on a new thread with its own runtime.
fn spawn_thread<F>(limiter: &str, task: F) -> Result<thread::JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| LimiterError::Runtime(format!("failed to build janitor runtime: {}", e)))?;

    thread::Builder::new()
        .name(format!("janitor-{}", limiter))
        .spawn(move || runtime.block_on(task))
        .map_err(|e| LimiterError::Runtime(format!("failed to spawn janitor thread: {}", e)))
}

async fn run(
    target: Weak<dyn Sweep>,
    interval: Duration,
    limiter: String,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        limiter = %limiter,
        interval_ms = interval.as_millis() as u64,
        "Janitor started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    break;
                };
                // A sweep takes every shard lock in turn; keep it off the async workers.
                match tokio::task::spawn_blocking(move || target.sweep()).await {
                    Ok(report) => debug!(
                        limiter = %limiter,
                        scanned = report.scanned,
                        evicted = report.evicted,
                        failed = report.failed,
                        "Janitor sweep complete"
                    ),
                    Err(e) => error!(limiter = %limiter, error = %e, "Janitor sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(limiter = %limiter, "Janitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingTarget {
        sweeps: AtomicUsize,
    }

    impl Sweep for CountingTarget {
        fn sweep(&self) -> SweepReport {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            SweepReport::default()
        }
    }

    fn spawn_for(target: &Arc<CountingTarget>, interval: Duration) -> Janitor {
        let target: Arc<dyn Sweep> = target.clone();
        Janitor::spawn(Arc::downgrade(&target), interval, "test".to_string()).unwrap()
    }

    #[test]
    fn test_sweep_interval() {
        assert_eq!(sweep_interval(Duration::from_secs(3600)), JANITOR_TICK);
        assert_eq!(sweep_interval(Duration::from_secs(10)), Duration::from_secs(5));
        assert_eq!(sweep_interval(Duration::from_nanos(1)), MIN_TICK);
    }

    #[test]
    fn test_spawn_without_runtime_uses_thread() {
        let target = Arc::new(CountingTarget::default());
        let janitor = spawn_for(&target, Duration::from_millis(5));
        assert_eq!(janitor.limiter(), "test");

        std::thread::sleep(Duration::from_millis(100));
        assert!(target.sweeps.load(Ordering::SeqCst) >= 2);
        assert!(janitor.is_running());

        futures::executor::block_on(janitor.stop());
        assert!(!janitor.is_running());
    }

    #[tokio::test]
    async fn test_thread_janitor_stopped_from_runtime() {
        let target = Arc::new(CountingTarget::default());
        let janitor = std::thread::spawn({
            let target = target.clone();
            move || spawn_for(&target, Duration::from_millis(5))
        })
        .join()
        .unwrap();
        assert!(matches!(janitor.host.lock().as_ref(), Some(Host::Thread(_))));

        janitor.stop().await;
        assert!(!janitor.is_running());
    }

    struct SlowTarget {
        started: AtomicBool,
    }

    impl Sweep for SlowTarget {
        fn sweep(&self) -> SweepReport {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            SweepReport::default()
        }
    }

    #[tokio::test]
    async fn test_slow_sweep_does_not_stall_runtime() {
        let target = Arc::new(SlowTarget {
            started: AtomicBool::new(false),
        });
        let dyn_target: Arc<dyn Sweep> = target.clone();
        let janitor =
            Janitor::spawn(Arc::downgrade(&dyn_target), Duration::from_millis(5), "slow".into())
                .unwrap();

        while !target.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Single-threaded runtime: a sweep run inline would hold this timer
        // back for the whole 200ms.
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(100));

        janitor.stop().await;
    }

    #[tokio::test]
    async fn test_janitor_sweeps_periodically() {
        let target = Arc::new(CountingTarget::default());
        let janitor = spawn_for(&target, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(target.sweeps.load(Ordering::SeqCst) >= 2);
        assert!(janitor.is_running());

        janitor.stop().await;
        assert!(!janitor.is_running());
        let after_stop = target.sweeps.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.sweeps.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_janitor_exits_when_target_dropped() {
        let target = Arc::new(CountingTarget::default());
        let janitor = spawn_for(&target, Duration::from_millis(5));
        drop(target);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!janitor.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let target = Arc::new(CountingTarget::default());
        let janitor = spawn_for(&target, Duration::from_millis(5));
        janitor.stop().await;
        janitor.stop().await;
        assert!(!janitor.is_running());
    }
}
