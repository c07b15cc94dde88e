//! Leak detection.
//!
//! A background task sweeps the active lease registry every
//! `leak_check_interval`. Leases held past `leak_threshold` are reported on
//! every sweep until they are released. Leases held past `cleanup_threshold`
//! are evicted from the registry; the physical connection is left alone and
//! stays consumed in the raw pool until the holder gives it back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DiagnosticsConfig;
use crate::registry::{ActiveLeaseRegistry, LeaseEntry};

/// A lease held past the leak threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
    /// Id of the leaked connection.
    pub connection_id: u64,
    /// How long the lease had been held at sweep time.
    pub held: Duration,
    /// Route of the request holding the lease, if bound.
    pub route: Option<String>,
    /// Method of the request holding the lease, if bound.
    pub method: Option<String>,
    /// Caller-supplied tag.
    pub info: Option<String>,
}

impl LeakReport {
    fn new(entry: &LeaseEntry, held: Duration) -> Self {
        Self {
            connection_id: entry.connection_id,
            held,
            route: entry.route.clone(),
            method: entry.method.clone(),
            info: entry.info.clone(),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Leases reported as leaked.
    pub leaked: Vec<LeakReport>,
    /// Connection ids whose registry entries were evicted.
    pub evicted: Vec<u64>,
}

impl SweepReport {
    /// Whether the sweep found nothing to report or evict.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty() && self.evicted.is_empty()
    }
}

/// Sweeps an [`ActiveLeaseRegistry`] for leaked leases.
#[derive(Debug)]
pub struct LeakDetector {
    registry: Arc<ActiveLeaseRegistry>,
    leak_threshold: Duration,
    cleanup_threshold: Duration,
    interval: Duration,
    sweeps: AtomicU64,
    leaks_reported: AtomicU64,
    evictions: AtomicU64,
}

impl LeakDetector {
    /// Create a detector over `registry` using the thresholds in `config`.
    pub fn new(registry: Arc<ActiveLeaseRegistry>, config: &DiagnosticsConfig) -> Self {
        Self {
            registry,
            leak_threshold: config.leak_threshold,
            cleanup_threshold: config.cleanup_threshold,
            interval: config.leak_check_interval,
            sweeps: AtomicU64::new(0),
            leaks_reported: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Interval between background sweeps.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Run one sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for entry in self.registry.snapshot() {
            let held = entry.held_for(now);

            if held > self.leak_threshold {
                tracing::warn!(
                    target: crate::LOG_TARGET,
                    connection_id = entry.connection_id,
                    held_ms = held.as_millis() as u64,
                    route = entry.route.as_deref().unwrap_or(""),
                    method = entry.method.as_deref().unwrap_or(""),
                    info = entry.info.as_deref().unwrap_or(""),
                    "possible connection leak: connection {} held for {}ms",
                    entry.connection_id,
                    held.as_millis()
                );
                report.leaked.push(LeakReport::new(&entry, held));
            }

            if held > self.cleanup_threshold
                && self.registry.evict(entry.connection_id, entry.acquired_at)
            {
                tracing::debug!(
                    target: crate::LOG_TARGET,
                    connection_id = entry.connection_id,
                    held_ms = held.as_millis() as u64,
                    "evicted stale lease from registry"
                );
                report.evicted.push(entry.connection_id);
            }
        }

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.leaks_reported
            .fetch_add(report.leaked.len() as u64, Ordering::Relaxed);
        self.evictions
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);

        report
    }

    /// Sweeps run so far.
    #[must_use]
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Leak reports emitted so far, counting repeats.
    #[must_use]
    pub fn leaks_reported(&self) -> u64 {
        self.leaks_reported.load(Ordering::Relaxed)
    }

    /// Registry entries evicted so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Start sweeping in the background.
    ///
    /// The task holds only a weak reference, so it also ends on its own once
    /// the detector is dropped. Must be called within a tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> LeakDetectorHandle {
        let cancel = CancellationToken::new();
        let detector = Arc::downgrade(self);
        let task = tokio::spawn(run(detector, self.interval, cancel.clone()));

        tracing::debug!(
            target: crate::LOG_TARGET,
            interval_ms = self.interval.as_millis() as u64,
            "leak detector started"
        );

        LeakDetectorHandle {
            cancel,
            task: Some(task),
        }
    }
}

async fn run(detector: Weak<LeakDetector>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(detector) = detector.upgrade() else {
                    break;
                };
                detector.sweep();
            }
        }
    }

    tracing::debug!(target: crate::LOG_TARGET, "leak detector stopped");
}

/// Owns the background sweep task.
///
/// Dropping the handle cancels the task without waiting for it.
#[derive(Debug)]
pub struct LeakDetectorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LeakDetectorHandle {
    /// Whether the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(
                    target: crate::LOG_TARGET,
                    error = %e,
                    "leak detector task ended abnormally"
                );
            }
        }
    }
}

impl Drop for LeakDetectorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(leak_ms: u64, cleanup_ms: u64) -> DiagnosticsConfig {
        DiagnosticsConfig {
            enabled: true,
            leak_threshold: Duration::from_millis(leak_ms),
            cleanup_threshold: Duration::from_millis(cleanup_ms),
            leak_check_interval: Duration::from_millis(10),
            ..DiagnosticsConfig::default()
        }
    }

    fn register(registry: &ActiveLeaseRegistry, id: u64, acquired_at: Instant) {
        registry.register(LeaseEntry {
            connection_id: id,
            acquired_at,
            route: Some("/reports".into()),
            method: Some("GET".into()),
            info: None,
        });
    }

    #[test]
    fn test_reports_without_dedup() {
        let registry = Arc::new(ActiveLeaseRegistry::new());
        let detector = LeakDetector::new(Arc::clone(&registry), &config(100, 10_000));
        let start = Instant::now();
        register(&registry, 1, start);
        register(&registry, 2, start + Duration::from_millis(150));

        let later = start + Duration::from_millis(200);
        let first = detector.sweep_at(later);
        assert_eq!(first.leaked.len(), 1);
        assert_eq!(first.leaked[0].connection_id, 1);
        assert_eq!(first.leaked[0].held, Duration::from_millis(200));
        assert_eq!(first.leaked[0].route.as_deref(), Some("/reports"));
        assert!(first.evicted.is_empty());

        let second = detector.sweep_at(later);
        assert_eq!(second.leaked.len(), 1);
        assert_eq!(detector.leaks_reported(), 2);
        assert_eq!(detector.sweeps(), 2);
    }

    #[test]
    fn test_evicts_past_cleanup_threshold() {
        let registry = Arc::new(ActiveLeaseRegistry::new());
        let detector = LeakDetector::new(Arc::clone(&registry), &config(100, 500));
        let start = Instant::now();
        register(&registry, 1, start);

        let report = detector.sweep_at(start + Duration::from_millis(600));
        assert_eq!(report.leaked.len(), 1);
        assert_eq!(report.evicted, vec![1]);
        assert!(registry.is_empty());

        assert!(detector.sweep_at(start + Duration::from_millis(700)).is_clean());
        assert_eq!(detector.evictions(), 1);
    }

    #[test]
    fn test_inverted_thresholds_evict_before_reporting() {
        let registry = Arc::new(ActiveLeaseRegistry::new());
        let detector = LeakDetector::new(Arc::clone(&registry), &config(1_000, 100));
        let start = Instant::now();
        register(&registry, 1, start);

        let report = detector.sweep_at(start + Duration::from_millis(200));
        assert!(report.leaked.is_empty());
        assert_eq!(report.evicted, vec![1]);
    }

    #[test]
    fn test_exact_threshold_is_not_a_leak() {
        let registry = Arc::new(ActiveLeaseRegistry::new());
        let detector = LeakDetector::new(Arc::clone(&registry), &config(100, 100));
        let start = Instant::now();
        register(&registry, 1, start);

        assert!(detector.sweep_at(start + Duration::from_millis(100)).is_clean());
    }

    #[tokio::test]
    async fn test_background_task_sweeps_and_stops() {
        let registry = Arc::new(ActiveLeaseRegistry::new());
        let detector = Arc::new(LeakDetector::new(Arc::clone(&registry), &config(1, 1)));
        register(&registry, 1, Instant::now());

        let handle = detector.spawn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(detector.sweeps() >= 1);
        assert!(registry.is_empty());

        handle.shutdown().await;
        let sweeps = detector.sweeps();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(detector.sweeps(), sweeps);
    }

    #[tokio::test]
    async fn test_task_ends_when_detector_dropped() {
        let registry = Arc::new(ActiveLeaseRegistry::new());
        let detector = Arc::new(LeakDetector::new(registry, &config(1, 1)));

        let handle = detector.spawn();
        drop(detector);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(handle.is_finished());
    }
}
