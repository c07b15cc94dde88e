//! # leasepool-testing
//!
//! Test infrastructure for leasepool.
//!
//! [`MockServer`] is an in-memory stand-in for a database server: it knows
//! which host or socket it listens on, optionally checks credentials, can
//! delay or refuse connections, and records every write it receives.
//! [`MockManager`] opens [`MockConnection`]s to it and plugs into
//! [`leasepool::PoolController::with_manager`]. [`LogCapture`] records the
//! pool's log events so tests can assert on them.
//!
//! ```rust,ignore
//! use leasepool::{GetConnectionOptions, PoolController, PoolOptions};
//! use leasepool_testing::{MockManager, MockServer};
//!
//! let server = MockServer::new("localhost");
//! let controller = PoolController::with_manager(MockManager::new(server.clone()));
//! controller.init(PoolOptions::new().host("localhost")).await?;
//!
//! let mut lease = controller.get_connection(GetConnectionOptions::new()).await?;
//! lease.execute("INSERT INTO test SET id = null").await?;
//! assert_eq!(server.writes().len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod logs;

pub use logs::{LogCapture, LogWriter};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use leasepool::{BoxError, ConnectOptions, ConnectTarget, ConnectionManager};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors raised by the mock server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MockError {
    /// The connect target does not match the server.
    #[error("getaddrinfo ENOTFOUND {0}")]
    HostNotFound(String),

    /// Credentials were rejected.
    #[error("access denied for user '{0}'")]
    AccessDenied(String),

    /// The server is refusing connections.
    #[error("connect ECONNREFUSED {0}")]
    Refused(String),

    /// The connection was used after being closed.
    #[error("cannot enqueue query after connection was closed")]
    Closed,
}

/// Result of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows affected.
    pub affected_rows: u64,
    /// Id generated by an `INSERT`, if any.
    pub insert_id: Option<u64>,
}

/// An in-memory database server.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct MockServer {
    inner: Arc<ServerState>,
}

#[derive(Debug)]
struct ServerState {
    host: Option<String>,
    socket_path: Option<PathBuf>,
    credentials: Mutex<Option<(String, String)>>,
    connect_latency: Mutex<Duration>,
    refusing: AtomicBool,
    writes: Mutex<Vec<String>>,
    next_insert_id: AtomicU64,
    connects: AtomicUsize,
    open: AtomicUsize,
}

impl MockServer {
    /// A server reachable at `host` over TCP.
    pub fn new(host: impl Into<String>) -> Self {
        Self::build(Some(host.into()), None)
    }

    /// A server reachable through a Unix socket at `path`.
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self::build(None, Some(path.into()))
    }

    fn build(host: Option<String>, socket_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(ServerState {
                host,
                socket_path,
                credentials: Mutex::new(None),
                connect_latency: Mutex::new(Duration::ZERO),
                refusing: AtomicBool::new(false),
                writes: Mutex::new(Vec::new()),
                next_insert_id: AtomicU64::new(1),
                connects: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
            }),
        }
    }

    /// Require a user and password.
    #[must_use]
    pub fn require_credentials(self, user: impl Into<String>, password: impl Into<String>) -> Self {
        *self.inner.credentials.lock() = Some((user.into(), password.into()));
        self
    }

    /// Delay every new connection by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        *self.inner.connect_latency.lock() = latency;
    }

    /// Refuse or accept new connections.
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Every write statement received, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.inner.writes.lock().clone()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn accept(&self, options: &ConnectOptions) -> Result<(), MockError> {
        match &options.target {
            ConnectTarget::Tcp { host, .. } if self.inner.host.as_deref() == Some(host) => {}
            ConnectTarget::Socket(path) if self.inner.socket_path.as_ref() == Some(path) => {}
            target => return Err(MockError::HostNotFound(target.to_string())),
        }

        if self.inner.refusing.load(Ordering::SeqCst) {
            return Err(MockError::Refused(options.target.to_string()));
        }

        if let Some((user, password)) = &*self.inner.credentials.lock() {
            let given_user = options.user.as_deref().unwrap_or_default();
            let given_password = options.password.as_deref().unwrap_or_default();
            if given_user != user || given_password != password {
                return Err(MockError::AccessDenied(given_user.to_string()));
            }
        }

        Ok(())
    }
}

/// A connection to a [`MockServer`].
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    server: MockServer,
    database: Option<String>,
    closed: bool,
}

impl MockConnection {
    /// Server-side connection number.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Database selected at connect time.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Execute a write statement.
    ///
    /// Statements starting with `INSERT` get a fresh insert id.
    pub async fn execute(&mut self, sql: &str) -> Result<ExecResult, MockError> {
        if self.closed {
            return Err(MockError::Closed);
        }

        let insert_id = sql
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("INSERT")
            .then(|| self.server.inner.next_insert_id.fetch_add(1, Ordering::SeqCst));

        self.server.inner.writes.lock().push(sql.to_string());
        tracing::trace!(connection = self.id, sql, "mock write");

        Ok(ExecResult {
            affected_rows: 1,
            insert_id,
        })
    }

    /// Return every write the server has recorded.
    pub async fn query_writes(&mut self) -> Result<Vec<String>, MockError> {
        if self.closed {
            return Err(MockError::Closed);
        }
        Ok(self.server.writes())
    }

    /// End the connection.
    pub fn end(&mut self) {
        if !self.closed {
            self.closed = true;
            self.server.inner.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.end();
    }
}

/// [`ConnectionManager`] opening [`MockConnection`]s.
#[derive(Debug, Clone)]
pub struct MockManager {
    server: MockServer,
}

impl MockManager {
    /// Manager connecting to `server`.
    #[must_use]
    pub fn new(server: MockServer) -> Self {
        Self { server }
    }

    /// The server this manager connects to.
    #[must_use]
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}

#[async_trait]
impl ConnectionManager for MockManager {
    type Connection = MockConnection;

    async fn connect(&self, options: &ConnectOptions) -> Result<MockConnection, BoxError> {
        let latency = *self.server.inner.connect_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.server.accept(options)?;

        let id = self.server.inner.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.server.inner.open.fetch_add(1, Ordering::SeqCst);

        Ok(MockConnection {
            id,
            server: self.server.clone(),
            database: options.database.clone(),
            closed: false,
        })
    }

    async fn close(&self, mut conn: MockConnection) -> Result<(), BoxError> {
        conn.end();
        Ok(())
    }
}
