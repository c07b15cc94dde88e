//! Leases: one outstanding grant of one connection to one caller.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::diagnostics::DiagnosticsSnapshot;
use crate::pool::PoolShared;
use crate::raw::{RawConnection, RawPool};

/// Options for a single acquisition.
#[derive(Debug, Clone, Default)]
pub struct GetConnectionOptions {
    /// Tag attached to the lease's diagnostics and leak reports.
    pub info: Option<String>,
}

impl GetConnectionOptions {
    /// Options with nothing set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a tag.
    #[must_use]
    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

/// A connection on loan from a [`LeasePool`](crate::LeasePool).
///
/// The lease is the only way to give the connection back: either
/// [`release`](Self::release) it or drop it. Whichever happens first
/// unregisters the lease and returns the connection; the release path runs
/// exactly once.
pub struct Lease<P: RawPool> {
    conn: Option<RawConnection<P::Connection>>,
    id: u64,
    snapshot: Option<DiagnosticsSnapshot>,
    acquired_at: Instant,
    route: Option<String>,
    method: Option<String>,
    pool: Arc<PoolShared<P>>,
}

impl<P: RawPool> Lease<P> {
    pub(crate) fn new(
        conn: RawConnection<P::Connection>,
        snapshot: Option<DiagnosticsSnapshot>,
        acquired_at: Instant,
        pool: Arc<PoolShared<P>>,
    ) -> Self {
        Self {
            id: conn.id(),
            conn: Some(conn),
            snapshot,
            acquired_at,
            route: None,
            method: None,
            pool,
        }
    }

    /// Id of the leased connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostics captured at acquisition, when diagnostics are enabled.
    #[must_use]
    pub fn snapshot(&self) -> Option<&DiagnosticsSnapshot> {
        self.snapshot.as_ref()
    }

    /// When the lease was handed out.
    #[must_use]
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// How long the lease has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Route of the request holding this lease.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Method of the request holding this lease.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Attach the request that holds this lease.
    ///
    /// Request context is usually known only after the connection was
    /// handed out, so it is merged into the registry entry here. If the
    /// entry was already evicted the context is kept on the lease only.
    pub fn bind_request(&mut self, route: impl Into<String>, method: impl Into<String>) {
        let route = route.into();
        let method = method.into();
        if let Some(registry) = self.pool.registry() {
            registry.bind_request(self.id, &route, &method);
        }
        self.route = Some(route);
        self.method = Some(method);
    }

    /// Give the connection back to the pool.
    pub fn release(mut self) {
        self.release_once();
    }

    /// Take the connection out of pool management.
    ///
    /// The pool frees the connection's slot and forgets its registry entry;
    /// closing the connection is up to the caller.
    pub fn detach(mut self) -> P::Connection {
        let Some(conn) = self.conn.take() else {
            unreachable!("connection is present until the lease is consumed");
        };

        if let Some(registry) = self.pool.registry() {
            registry.unregister(self.id);
        }
        let conn = self.pool.raw().detach(conn);

        tracing::debug!(
            target: crate::LOG_TARGET,
            connection_id = self.id,
            "connection detached from pool"
        );
        conn
    }

    fn release_once(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // Unregister before the connection becomes free, so a new lease of
        // the same connection cannot have its entry removed by this one.
        if let Some(registry) = self.pool.registry() {
            registry.unregister(self.id);
        }
        self.pool.raw().release(conn);
        self.pool.record_release();

        tracing::debug!(
            target: crate::LOG_TARGET,
            connection_id = self.id,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "lease released"
        );
    }
}

impl<P: RawPool> Deref for Lease<P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn.get(),
            None => unreachable!("connection is present until the lease is consumed"),
        }
    }
}

impl<P: RawPool> DerefMut for Lease<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.get_mut(),
            None => unreachable!("connection is present until the lease is consumed"),
        }
    }
}

impl<P: RawPool> Drop for Lease<P> {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl<P: RawPool> fmt::Debug for Lease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("acquired_at", &self.acquired_at)
            .field("route", &self.route)
            .field("method", &self.method)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}
