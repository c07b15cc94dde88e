//! The raw pool: a bounded set of physical connections.
//!
//! The lease and diagnostics layers only rely on the narrow [`RawPool`]
//! contract: acquire, release, detach, drain and a best-effort counters
//! read-out.
//! [`BoundedPool`] is the stock implementation, opening connections through
//! a [`ConnectionManager`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::ConnectOptions;
use crate::error::{BoxError, PoolError, Result};

/// Opens and closes physical connections.
///
/// This is the driver seam: the pool never speaks a wire protocol itself.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The physical connection type.
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self, options: &ConnectOptions) -> std::result::Result<Self::Connection, BoxError>;

    /// Close a connection during drain.
    ///
    /// The default implementation drops it.
    async fn close(&self, conn: Self::Connection) -> std::result::Result<(), BoxError> {
        drop(conn);
        Ok(())
    }
}

/// A physical connection together with its pool-assigned identity.
#[derive(Debug)]
pub struct RawConnection<C> {
    id: u64,
    conn: C,
}

impl<C> RawConnection<C> {
    /// Wrap a connection with its identity.
    pub fn new(id: u64, conn: C) -> Self {
        Self { id, conn }
    }

    /// Stable identity, unique within one raw pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the connection.
    pub fn get(&self) -> &C {
        &self.conn
    }

    /// Mutably borrow the connection.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Unwrap the connection.
    pub fn into_inner(self) -> C {
        self.conn
    }
}

/// Point-in-time counters reported by a raw pool.
///
/// `None` means the pool cannot report that counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    /// All physical connections currently open.
    pub total: Option<usize>,
    /// Open connections sitting idle.
    pub free: Option<usize>,
    /// Connections being opened right now.
    pub acquiring: Option<usize>,
    /// Callers waiting for a connection.
    pub queue_length: Option<usize>,
}

impl PoolCounters {
    /// Counters with every value unknown.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// The contract the lease layer needs from an underlying pool.
#[async_trait]
pub trait RawPool: Send + Sync + 'static {
    /// Connection type handed out.
    type Connection: Send + 'static;

    /// Acquire a connection, waiting while the pool is exhausted.
    async fn acquire(&self) -> Result<RawConnection<Self::Connection>>;

    /// Return a connection.
    ///
    /// Must not block: it is called from `Drop`.
    fn release(&self, conn: RawConnection<Self::Connection>);

    /// Give up ownership of a leased connection.
    ///
    /// The pool stops counting the connection and frees its slot; the
    /// caller becomes responsible for closing it.
    fn detach(&self, conn: RawConnection<Self::Connection>) -> Self::Connection;

    /// Close all idle connections and refuse further acquisitions.
    ///
    /// Connections still held by callers are not waited for.
    async fn drain(&self) -> Result<()>;

    /// Current counters. Defaults to all unknown.
    fn counters(&self) -> PoolCounters {
        PoolCounters::unknown()
    }
}

/// Bounded pool over a [`ConnectionManager`].
///
/// At most `max_connections` physical connections exist at once. Idle
/// connections are reused first-in first-out. Waiters are queued on a tokio
/// semaphore; no fairness is promised beyond what it provides.
pub struct BoundedPool<M: ConnectionManager> {
    manager: M,
    options: ConnectOptions,
    semaphore: Semaphore,
    state: Mutex<BoundedState<M::Connection>>,
    next_connection_id: AtomicU64,
    acquiring: AtomicUsize,
    waiting: AtomicUsize,
    closed: AtomicBool,
}

struct BoundedState<C> {
    idle: VecDeque<RawConnection<C>>,
    /// Open connections, idle plus leased.
    total: usize,
    leased: usize,
}

/// Decrements a gauge when dropped, so cancelled acquisitions stay counted
/// correctly.
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<M: ConnectionManager> BoundedPool<M> {
    /// Create an empty pool. No connection is opened until first acquire.
    pub fn new(manager: M, options: ConnectOptions) -> Self {
        tracing::info!(
            target: crate::LOG_TARGET,
            target_addr = %options.target,
            max = options.max_connections,
            "connection pool created"
        );

        Self {
            semaphore: Semaphore::new(options.max_connections as usize),
            manager,
            options,
            state: Mutex::new(BoundedState {
                idle: VecDeque::new(),
                total: 0,
                leased: 0,
            }),
            next_connection_id: AtomicU64::new(1),
            acquiring: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Options this pool opens connections with.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Number of connections currently held by callers.
    #[must_use]
    pub fn leased(&self) -> usize {
        self.state.lock().leased
    }

    /// Whether the pool has been drained.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl<M: ConnectionManager> RawPool for BoundedPool<M> {
    type Connection = M::Connection;

    async fn acquire(&self) -> Result<RawConnection<M::Connection>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        // One budget covers both waiting for a slot and opening a connection.
        let deadline = self
            .options
            .acquire_timeout
            .map(|timeout| (timeout, Instant::now() + timeout));

        let permit = {
            let _waiting = GaugeGuard::enter(&self.waiting);
            let acquire = self.semaphore.acquire();
            let acquired = match deadline {
                Some((timeout, deadline)) => tokio::time::timeout_at(deadline, acquire)
                    .await
                    .map_err(|_| PoolError::AcquireTimeout(timeout))?,
                None => acquire.await,
            };
            acquired.map_err(|_| PoolError::Closed)?
        };

        let reused = {
            let mut state = self.state.lock();
            let conn = state.idle.pop_front();
            if conn.is_some() {
                state.leased += 1;
            }
            conn
        };

        if let Some(conn) = reused {
            tracing::trace!(
                target: crate::LOG_TARGET,
                connection_id = conn.id(),
                "reused idle connection"
            );
            permit.forget();
            return Ok(conn);
        }

        let conn = {
            let _acquiring = GaugeGuard::enter(&self.acquiring);
            let connect = self.manager.connect(&self.options);
            let connected = match deadline {
                Some((timeout, deadline)) => tokio::time::timeout_at(deadline, connect)
                    .await
                    .map_err(|_| PoolError::AcquireTimeout(timeout))?,
                None => connect.await,
            };
            connected.map_err(PoolError::Connection)?
        };

        let id = self.next_connection_id();
        {
            let mut state = self.state.lock();
            state.total += 1;
            state.leased += 1;
        }
        permit.forget();

        tracing::trace!(
            target: crate::LOG_TARGET,
            connection_id = id,
            "opened new connection"
        );

        Ok(RawConnection::new(id, conn))
    }

    fn release(&self, conn: RawConnection<M::Connection>) {
        let id = conn.id();
        let discarded = {
            let mut state = self.state.lock();
            state.leased = state.leased.saturating_sub(1);
            if self.is_closed() {
                state.total = state.total.saturating_sub(1);
                Some(conn)
            } else {
                state.idle.push_back(conn);
                None
            }
        };

        if let Some(conn) = discarded {
            // Drained pools keep no idle set; the connection closes on drop.
            tracing::debug!(
                target: crate::LOG_TARGET,
                connection_id = id,
                "connection released after drain, closing"
            );
            drop(conn);
            return;
        }

        self.semaphore.add_permits(1);
        tracing::trace!(
            target: crate::LOG_TARGET,
            connection_id = id,
            "returned connection to pool"
        );
    }

    fn detach(&self, conn: RawConnection<M::Connection>) -> M::Connection {
        let id = conn.id();
        {
            let mut state = self.state.lock();
            state.total = state.total.saturating_sub(1);
            state.leased = state.leased.saturating_sub(1);
        }
        if !self.is_closed() {
            self.semaphore.add_permits(1);
        }

        tracing::trace!(
            target: crate::LOG_TARGET,
            connection_id = id,
            "connection detached, slot freed"
        );
        conn.into_inner()
    }

    async fn drain(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();

        let (idle, still_leased) = {
            let mut state = self.state.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(idle.len());
            (idle, state.leased)
        };

        let closing = idle.len();
        let mut first_error = None;
        for conn in idle {
            if let Err(e) = self.manager.close(conn.into_inner()).await {
                first_error.get_or_insert(e);
            }
        }

        tracing::info!(
            target: crate::LOG_TARGET,
            closed = closing,
            still_leased = still_leased,
            "connection pool drained"
        );

        match first_error {
            Some(e) => Err(PoolError::Drain(e)),
            None => Ok(()),
        }
    }

    fn counters(&self) -> PoolCounters {
        let state = self.state.lock();
        PoolCounters {
            total: Some(state.total),
            free: Some(state.idle.len()),
            acquiring: Some(self.acquiring.load(Ordering::Acquire)),
            queue_length: Some(self.waiting.load(Ordering::Acquire)),
        }
    }
}
