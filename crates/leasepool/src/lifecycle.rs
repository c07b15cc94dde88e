//! Pool lifecycle: init, shutdown and access to the active pool.
//!
//! A [`PoolController`] owns at most one active [`LeasePool`] together with
//! its leak detector task. It replaces process-wide pool state: callers hold
//! the controller (usually behind an `Arc`) and pass it wherever a
//! connection is needed.

use std::fmt;

use tokio::sync::Mutex;

use crate::config::{ConnectOptions, PoolOptions};
use crate::error::{PoolError, Result};
use crate::leak::LeakDetectorHandle;
use crate::lease::{GetConnectionOptions, Lease};
use crate::pool::{LeasePool, PoolMetrics, PoolStatus};
use crate::raw::{BoundedPool, ConnectionManager, RawPool};

type RawPoolFactory<P> = Box<dyn Fn(&ConnectOptions) -> P + Send + Sync>;

/// Creates, hands out and shuts down a single pool.
///
/// # Example
///
/// ```rust,ignore
/// use leasepool::{GetConnectionOptions, PoolController, PoolOptions};
///
/// let controller = PoolController::with_manager(manager);
/// controller
///     .init(PoolOptions::new().host("localhost").user("root").database("test"))
///     .await?;
///
/// let lease = controller.get_connection(GetConnectionOptions::new()).await?;
/// // Use the connection...
/// lease.release();
///
/// controller.stop().await?;
/// ```
pub struct PoolController<P: RawPool> {
    factory: RawPoolFactory<P>,
    state: Mutex<Option<ActivePool<P>>>,
}

struct ActivePool<P: RawPool> {
    pool: LeasePool<P>,
    detector: Option<LeakDetectorHandle>,
}

impl<M> PoolController<BoundedPool<M>>
where
    M: ConnectionManager + Clone,
{
    /// Controller whose pools are [`BoundedPool`]s over `manager`.
    pub fn with_manager(manager: M) -> Self {
        Self::new(move |options: &ConnectOptions| BoundedPool::new(manager.clone(), options.clone()))
    }
}

impl<P: RawPool> PoolController<P> {
    /// Controller building raw pools with `factory`.
    ///
    /// The factory only receives the connect options; diagnostics settings
    /// never reach the raw pool.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ConnectOptions) -> P + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            state: Mutex::new(None),
        }
    }

    /// Create the pool.
    ///
    /// - With a pool already active, empty options are a no-op and
    ///   non-empty options fail with [`PoolError::AlreadyConfigured`].
    /// - Without a pool, empty options fail with
    ///   [`PoolError::NotInitialized`].
    /// - Otherwise the options are validated, the raw pool is built and one
    ///   connection is acquired and released to fail fast on bad
    ///   credentials or an unreachable server. If that probe fails the new
    ///   pool is drained and discarded, leaving the controller ready for
    ///   another `init`.
    ///
    /// With diagnostics enabled the leak detector starts here.
    pub async fn init(&self, options: PoolOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        let has_options = !options.is_empty();

        if state.is_some() {
            if has_options {
                return Err(PoolError::AlreadyConfigured);
            }
            return Ok(());
        }

        if !has_options {
            return Err(PoolError::NotInitialized(PoolError::NO_POOL_NO_OPTIONS));
        }

        let config = options.validate()?;
        let diagnostics = *config.diagnostics();
        if diagnostics.enabled && diagnostics.cleanup_threshold < diagnostics.leak_threshold {
            tracing::warn!(
                target: crate::LOG_TARGET,
                leak_threshold_ms = diagnostics.leak_threshold.as_millis() as u64,
                cleanup_threshold_ms = diagnostics.cleanup_threshold.as_millis() as u64,
                "cleanupThreshold is below leakThreshold; leases will be evicted before they are reported"
            );
        }

        let pool = LeasePool::new((self.factory)(config.connect()), config);

        match pool.raw().acquire().await {
            Ok(conn) => pool.raw().release(conn),
            Err(e) => {
                if let Err(drain_err) = pool.drain().await {
                    tracing::warn!(
                        target: crate::LOG_TARGET,
                        error = %drain_err,
                        "failed to drain pool after test connection failure"
                    );
                }
                return Err(e);
            }
        }

        let detector = pool.spawn_leak_detector();
        *state = Some(ActivePool { pool, detector });

        tracing::info!(
            target: crate::LOG_TARGET,
            diagnostics = diagnostics.enabled,
            "connection to the database successful"
        );

        Ok(())
    }

    /// Acquire a connection from the active pool.
    pub async fn get_connection(&self, opts: GetConnectionOptions) -> Result<Lease<P>> {
        let pool = self.pool().await?;
        pool.get_connection(opts).await
    }

    /// A handle to the active pool.
    ///
    /// The handle stays usable after [`stop`](Self::stop), but the drained
    /// raw pool refuses new acquisitions.
    pub async fn pool(&self) -> Result<LeasePool<P>> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|active| active.pool.clone())
            .ok_or(PoolError::NotInitialized(PoolError::NO_POOL))
    }

    /// Whether a pool is active.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Status of the active pool.
    pub async fn status(&self) -> Result<Option<PoolStatus>> {
        Ok(self.pool().await?.status())
    }

    /// Metrics of the active pool.
    pub async fn metrics(&self) -> Result<PoolMetrics> {
        Ok(self.pool().await?.metrics())
    }

    /// Shut the pool down.
    ///
    /// Clears the active pool, stops the leak detector and drains the raw
    /// pool. Leases still held by callers are not reclaimed; releasing them
    /// afterwards closes their connections.
    pub async fn stop(&self) -> Result<()> {
        let active = self
            .state
            .lock()
            .await
            .take()
            .ok_or(PoolError::NotInitialized(PoolError::NO_POOL))?;

        if let Some(detector) = active.detector {
            detector.shutdown().await;
        }

        let outstanding = active.pool.registry().map(|r| r.len());
        active.pool.drain().await?;

        tracing::info!(
            target: crate::LOG_TARGET,
            outstanding_leases = ?outstanding,
            "pool stopped"
        );

        Ok(())
    }
}

impl<P: RawPool> fmt::Debug for PoolController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initialized = self.state.try_lock().map(|s| s.is_some()).ok();
        f.debug_struct("PoolController")
            .field("initialized", &initialized)
            .finish_non_exhaustive()
    }
}
