//! The lease pool.
//!
//! [`LeasePool`] sits on top of a [`RawPool`] and turns raw connections into
//! [`Lease`]s. With diagnostics enabled it also times every acquisition,
//! keeps the active lease registry and owns the leak detector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::diagnostics::DiagnosticsCollector;
use crate::error::Result;
use crate::leak::{LeakDetector, LeakDetectorHandle, SweepReport};
use crate::lease::{GetConnectionOptions, Lease};
use crate::raw::RawPool;
use crate::registry::{ActiveLeaseRegistry, LeaseEntry};

/// A connection pool that hands out instrumented leases.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use leasepool::{BoundedPool, GetConnectionOptions, LeasePool, PoolOptions};
///
/// let config = PoolOptions::new()
///     .host("localhost")
///     .pool_diagnostics(true)
///     .validate()?;
/// let pool = LeasePool::new(BoundedPool::new(manager, config.connect().clone()), config);
///
/// let lease = pool.get_connection(GetConnectionOptions::new().info("nightly-report")).await?;
/// // Use the connection through the lease...
/// lease.release();
/// ```
pub struct LeasePool<P: RawPool> {
    inner: Arc<PoolShared<P>>,
}

impl<P: RawPool> Clone for LeasePool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// State shared by the pool and every lease it handed out.
pub(crate) struct PoolShared<P: RawPool> {
    config: PoolConfig,
    raw: P,
    /// Present only when diagnostics are enabled.
    diagnostics: Option<Diagnostics>,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

struct Diagnostics {
    collector: DiagnosticsCollector,
    registry: Arc<ActiveLeaseRegistry>,
    detector: Arc<LeakDetector>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    checkouts_successful: u64,
    checkouts_failed: u64,
    releases: u64,
    slow_acquires: u64,
}

impl<P: RawPool> PoolShared<P> {
    pub(crate) fn raw(&self) -> &P {
        &self.raw
    }

    pub(crate) fn registry(&self) -> Option<&ActiveLeaseRegistry> {
        self.diagnostics.as_ref().map(|d| d.registry.as_ref())
    }

    pub(crate) fn record_release(&self) {
        self.metrics.lock().releases += 1;
    }
}

impl<P: RawPool> LeasePool<P> {
    /// Wrap a raw pool.
    ///
    /// `config` supplies the diagnostics settings; the raw pool was already
    /// built from its connect options.
    pub fn new(raw: P, config: PoolConfig) -> Self {
        let settings = *config.diagnostics();
        let diagnostics = settings.enabled.then(|| {
            let registry = Arc::new(ActiveLeaseRegistry::new());
            Diagnostics {
                collector: DiagnosticsCollector::new(settings.slow_acquire_threshold),
                detector: Arc::new(LeakDetector::new(Arc::clone(&registry), &settings)),
                registry,
            }
        });

        Self {
            inner: Arc::new(PoolShared {
                config,
                raw,
                diagnostics,
                created_at: Instant::now(),
                metrics: Mutex::new(PoolMetricsInner::default()),
            }),
        }
    }

    /// Acquire a connection.
    ///
    /// Waits while the raw pool is exhausted, bounded only by the raw pool's
    /// own acquire timeout.
    pub async fn get_connection(&self, opts: GetConnectionOptions) -> Result<Lease<P>> {
        let timer = self
            .inner
            .diagnostics
            .as_ref()
            .map(|d| d.collector.begin(self.inner.raw.counters()));

        let conn = match self.inner.raw.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                self.inner.metrics.lock().checkouts_failed += 1;
                return Err(e);
            }
        };
        let acquired_at = Instant::now();

        let snapshot = timer.map(|timer| timer.finish(conn.id(), opts.info.clone()));

        {
            let mut metrics = self.inner.metrics.lock();
            metrics.checkouts_successful += 1;
            if snapshot.as_ref().is_some_and(|s| s.is_slow_acquire()) {
                metrics.slow_acquires += 1;
            }
        }

        if let Some(diagnostics) = &self.inner.diagnostics {
            diagnostics.registry.register(LeaseEntry {
                connection_id: conn.id(),
                acquired_at,
                route: None,
                method: None,
                info: opts.info,
            });
        }

        tracing::trace!(
            target: crate::LOG_TARGET,
            connection_id = conn.id(),
            "lease acquired"
        );

        Ok(Lease::new(conn, snapshot, acquired_at, Arc::clone(&self.inner)))
    }

    /// The active lease registry, when diagnostics are enabled.
    #[must_use]
    pub fn registry(&self) -> Option<&ActiveLeaseRegistry> {
        self.inner.registry()
    }

    /// The leak detector, when diagnostics are enabled.
    #[must_use]
    pub fn leak_detector(&self) -> Option<&LeakDetector> {
        self.inner.diagnostics.as_ref().map(|d| d.detector.as_ref())
    }

    /// Run one leak detector sweep now.
    ///
    /// Returns `None` when diagnostics are disabled.
    pub fn sweep_leaks(&self) -> Option<SweepReport> {
        self.leak_detector().map(LeakDetector::sweep)
    }

    /// Start the background leak detector.
    ///
    /// Returns `None` when diagnostics are disabled. The task stops when the
    /// handle is shut down or dropped, or when the pool is dropped.
    pub fn spawn_leak_detector(&self) -> Option<LeakDetectorHandle> {
        self.inner
            .diagnostics
            .as_ref()
            .map(|d| d.detector.spawn())
    }

    /// Drain the raw pool.
    ///
    /// Outstanding leases are not reclaimed.
    pub async fn drain(&self) -> Result<()> {
        self.inner.raw.drain().await
    }

    /// The underlying raw pool.
    #[must_use]
    pub fn raw(&self) -> &P {
        &self.inner.raw
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Current pool status, if the raw pool reports its counters.
    #[must_use]
    pub fn status(&self) -> Option<PoolStatus> {
        let counters = self.inner.raw.counters();
        let total = counters.total?;
        let available = counters.free?;
        Some(PoolStatus {
            available,
            in_use: total.saturating_sub(available),
            total,
            waiting: counters.queue_length.unwrap_or(0),
            max: self.inner.config.connect().max_connections as usize,
        })
    }

    /// Pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        let detector = self.leak_detector();
        PoolMetrics {
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            releases: inner.releases,
            slow_acquires: inner.slow_acquires,
            leaks_reported: detector.map_or(0, LeakDetector::leaks_reported),
            evictions: detector.map_or(0, LeakDetector::evictions),
            active_leases: self.registry().map(ActiveLeaseRegistry::len),
            uptime: self.inner.created_at.elapsed(),
        }
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Total number of open connections.
    pub total: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
    /// Maximum allowed connections.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max && self.available == 0
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Successful acquisitions.
    pub checkouts_successful: u64,
    /// Failed acquisitions (timeouts, connect errors, closed pool).
    pub checkouts_failed: u64,
    /// Leases released, explicitly or by drop.
    pub releases: u64,
    /// Acquisitions flagged as slow.
    pub slow_acquires: u64,
    /// Leak reports emitted, counting repeats.
    pub leaks_reported: u64,
    /// Registry entries evicted by the leak detector.
    pub evictions: u64,
    /// Leases currently in the registry; `None` with diagnostics off.
    pub active_leases: Option<usize>,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Fraction of successful checkouts that were slow (0.0 to 1.0).
    #[must_use]
    pub fn slow_acquire_rate(&self) -> f64 {
        if self.checkouts_successful == 0 {
            return 0.0;
        }
        self.slow_acquires as f64 / self.checkouts_successful as f64
    }
}
