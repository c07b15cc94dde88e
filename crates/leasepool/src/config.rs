//! Pool configuration.
//!
//! Options arrive as a [`PoolOptions`] bag (typed setters, an option string,
//! or a JSON object) and are validated into an immutable [`PoolConfig`]
//! before any pool is created. Only [`ConnectOptions`] is handed to the raw
//! pool; the diagnostics thresholds stay with the diagnostics subsystem.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PoolError, Result};

/// Default server port for TCP targets.
pub const DEFAULT_PORT: u16 = 3306;

/// Default maximum number of physical connections.
pub const DEFAULT_CONNECTION_LIMIT: u32 = 10;

/// Default slow-acquire threshold.
pub const DEFAULT_SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_millis(1_000);

/// Default leak threshold.
pub const DEFAULT_LEAK_THRESHOLD: Duration = Duration::from_millis(120_000);

/// Default interval between leak detector sweeps.
pub const DEFAULT_LEAK_CHECK_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default cleanup (registry eviction) threshold.
pub const DEFAULT_CLEANUP_THRESHOLD: Duration = Duration::from_millis(240_000);

/// Unvalidated pool options.
///
/// Every field is optional. An options value with nothing set is *empty*,
/// which `init` treats as "reuse the existing pool".
///
/// Thresholds are signed milliseconds so that negative input survives until
/// [`validate`](Self::validate) can reject it.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOptions {
    /// Server hostname. Mutually exclusive with `socket_path`.
    pub host: Option<String>,
    /// Unix socket path. Mutually exclusive with `host`.
    pub socket_path: Option<PathBuf>,
    /// Server port, ignored for socket targets.
    pub port: Option<u16>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Database name.
    pub database: Option<String>,
    /// Maximum number of physical connections.
    pub connection_limit: Option<u32>,
    /// Maximum time to wait for a free connection, in milliseconds.
    pub acquire_timeout: Option<i64>,
    /// Enables lease tracking, slow-acquire warnings and leak detection.
    pub pool_diagnostics: Option<bool>,
    /// Slow-acquire threshold in milliseconds.
    pub slow_acquire_threshold: Option<i64>,
    /// Leak threshold in milliseconds.
    pub leak_threshold: Option<i64>,
    /// Leak detector interval in milliseconds.
    pub leak_check_interval: Option<i64>,
    /// Registry eviction threshold in milliseconds.
    pub cleanup_threshold: Option<i64>,
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("host", &self.host)
            .field("socket_path", &self.socket_path)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("connection_limit", &self.connection_limit)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("pool_diagnostics", &self.pool_diagnostics)
            .field("slow_acquire_threshold", &self.slow_acquire_threshold)
            .field("leak_threshold", &self.leak_threshold)
            .field("leak_check_interval", &self.leak_check_interval)
            .field("cleanup_threshold", &self.cleanup_threshold)
            .finish()
    }
}

impl PoolOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;` option string.
    ///
    /// ```text
    /// host=localhost;user=root;database=test;poolDiagnostics=true;leakThreshold=30000
    /// ```
    ///
    /// Keys are case-insensitive. `server=host,port` is accepted as a
    /// shorthand for host plus port. Unknown keys are ignored.
    pub fn from_option_string(s: &str) -> Result<Self> {
        let mut options = Self::default();

        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" | "data source" => {
                    if let Some((host, port)) = value.split_once(',') {
                        options.host = Some(host.trim().to_string());
                        options.port = Some(parse_number("port", port.trim())?);
                    } else {
                        options.host = Some(value.to_string());
                    }
                }
                "socketpath" | "socket path" | "socket" => {
                    options.socket_path = Some(PathBuf::from(value));
                }
                "port" => options.port = Some(parse_number("port", value)?),
                "user" | "user id" | "uid" => options.user = Some(value.to_string()),
                "password" | "pwd" => options.password = Some(value.to_string()),
                "database" | "initial catalog" => options.database = Some(value.to_string()),
                "connectionlimit" | "connection limit" => {
                    options.connection_limit = Some(parse_number("connectionLimit", value)?);
                }
                "acquiretimeout" | "acquire timeout" => {
                    options.acquire_timeout = Some(parse_number("acquireTimeout", value)?);
                }
                "pooldiagnostics" | "pool diagnostics" => {
                    options.pool_diagnostics = Some(parse_bool("poolDiagnostics", value)?);
                }
                "slowacquirethreshold" => {
                    options.slow_acquire_threshold =
                        Some(parse_number("slowAcquireThreshold", value)?);
                }
                "leakthreshold" => {
                    options.leak_threshold = Some(parse_number("leakThreshold", value)?);
                }
                "leakcheckinterval" => {
                    options.leak_check_interval = Some(parse_number("leakCheckInterval", value)?);
                }
                "cleanupthreshold" => {
                    options.cleanup_threshold = Some(parse_number("cleanupThreshold", value)?);
                }
                _ => {
                    tracing::debug!(
                        target: crate::LOG_TARGET,
                        key = key,
                        "ignoring unknown pool option"
                    );
                }
            }
        }

        Ok(options)
    }

    /// Deserialize options from a JSON object with camelCase keys.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PoolError::config(format!("invalid pool options: {e}")))
    }

    /// Whether no option has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.socket_path.is_none()
            && self.port.is_none()
            && self.user.is_none()
            && self.password.is_none()
            && self.database.is_none()
            && self.connection_limit.is_none()
            && self.acquire_timeout.is_none()
            && self.pool_diagnostics.is_none()
            && self.slow_acquire_threshold.is_none()
            && self.leak_threshold.is_none()
            && self.leak_check_interval.is_none()
            && self.cleanup_threshold.is_none()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the Unix socket path.
    #[must_use]
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the maximum number of physical connections.
    #[must_use]
    pub fn connection_limit(mut self, limit: u32) -> Self {
        self.connection_limit = Some(limit);
        self
    }

    /// Set the acquire timeout in milliseconds.
    #[must_use]
    pub fn acquire_timeout_ms(mut self, ms: i64) -> Self {
        self.acquire_timeout = Some(ms);
        self
    }

    /// Enable or disable pool diagnostics.
    #[must_use]
    pub fn pool_diagnostics(mut self, enabled: bool) -> Self {
        self.pool_diagnostics = Some(enabled);
        self
    }

    /// Set the slow-acquire threshold in milliseconds.
    #[must_use]
    pub fn slow_acquire_threshold_ms(mut self, ms: i64) -> Self {
        self.slow_acquire_threshold = Some(ms);
        self
    }

    /// Set the leak threshold in milliseconds.
    #[must_use]
    pub fn leak_threshold_ms(mut self, ms: i64) -> Self {
        self.leak_threshold = Some(ms);
        self
    }

    /// Set the leak detector interval in milliseconds.
    #[must_use]
    pub fn leak_check_interval_ms(mut self, ms: i64) -> Self {
        self.leak_check_interval = Some(ms);
        self
    }

    /// Set the cleanup threshold in milliseconds.
    #[must_use]
    pub fn cleanup_threshold_ms(mut self, ms: i64) -> Self {
        self.cleanup_threshold = Some(ms);
        self
    }

    /// Validate the options into a [`PoolConfig`].
    ///
    /// Requires exactly one of `host` and `socket_path`, non-negative
    /// thresholds and a positive connection limit. The leak check interval
    /// must also be positive when diagnostics are enabled. The ordering of `leak_threshold` and `cleanup_threshold` is
    /// deliberately not checked.
    pub fn validate(&self) -> Result<PoolConfig> {
        let host = self.host.as_deref().map(str::trim).filter(|h| !h.is_empty());
        let socket = self
            .socket_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty());

        let target = match (host, socket) {
            (Some(host), None) => ConnectTarget::Tcp {
                host: host.to_string(),
                port: self.port.unwrap_or(DEFAULT_PORT),
            },
            (None, Some(path)) => ConnectTarget::Socket(path.clone()),
            (Some(_), Some(_)) => {
                return Err(PoolError::config(
                    "options must not include both host and socketPath properties",
                ));
            }
            (None, None) => {
                return Err(PoolError::config(
                    "options must include host or socketPath property",
                ));
            }
        };

        let max_connections = self.connection_limit.unwrap_or(DEFAULT_CONNECTION_LIMIT);
        if max_connections == 0 {
            return Err(PoolError::config("connectionLimit must be greater than 0"));
        }

        let acquire_timeout = self
            .acquire_timeout
            .map(|ms| millis("acquireTimeout", ms))
            .transpose()?;

        let enabled = self.pool_diagnostics.unwrap_or(false);
        let leak_check_interval = threshold(
            "leakCheckInterval",
            self.leak_check_interval,
            DEFAULT_LEAK_CHECK_INTERVAL,
        )?;
        // Only the leak detector ticks on this interval.
        if enabled && leak_check_interval.is_zero() {
            return Err(PoolError::config("leakCheckInterval must be greater than 0"));
        }

        let diagnostics = DiagnosticsConfig {
            enabled,
            slow_acquire_threshold: threshold(
                "slowAcquireThreshold",
                self.slow_acquire_threshold,
                DEFAULT_SLOW_ACQUIRE_THRESHOLD,
            )?,
            leak_threshold: threshold(
                "leakThreshold",
                self.leak_threshold,
                DEFAULT_LEAK_THRESHOLD,
            )?,
            leak_check_interval,
            cleanup_threshold: threshold(
                "cleanupThreshold",
                self.cleanup_threshold,
                DEFAULT_CLEANUP_THRESHOLD,
            )?,
        };

        Ok(PoolConfig {
            connect: ConnectOptions {
                target,
                user: self.user.clone(),
                password: self.password.clone(),
                database: self.database.clone(),
                max_connections,
                acquire_timeout,
            },
            diagnostics,
        })
    }
}

fn threshold(name: &str, value: Option<i64>, default: Duration) -> Result<Duration> {
    value.map_or(Ok(default), |ms| millis(name, ms))
}

fn millis(name: &str, ms: i64) -> Result<Duration> {
    u64::try_from(ms).map(Duration::from_millis).map_err(|_| {
        PoolError::config(format!(
            "{name} must be a non-negative number of milliseconds, got {ms}"
        ))
    })
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PoolError::config(format!("invalid {name}: {value}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") || value == "0"
    {
        Ok(false)
    } else {
        Err(PoolError::config(format!("invalid {name}: {value}")))
    }
}

/// Where physical connections are opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// TCP host and port.
    Tcp {
        /// Hostname or IP address.
        host: String,
        /// Port.
        port: u16,
    },
    /// Unix domain socket.
    Socket(PathBuf),
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Socket(path) => write!(f, "{}", path.display()),
        }
    }
}

/// The subset of configuration the raw pool needs to open connections.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Connection target.
    pub target: ConnectTarget,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Database name.
    pub database: Option<String>,
    /// Maximum number of physical connections.
    pub max_connections: u32,
    /// Maximum time to wait for a free connection. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("target", &self.target)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Diagnostics settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Whether lease tracking and leak detection are active.
    pub enabled: bool,
    /// Acquisitions slower than this are flagged.
    pub slow_acquire_threshold: Duration,
    /// Leases held longer than this are reported as leaks.
    pub leak_threshold: Duration,
    /// Interval between leak detector sweeps.
    pub leak_check_interval: Duration,
    /// Registry entries older than this are evicted.
    ///
    /// Nothing stops this from being lower than `leak_threshold`, in which
    /// case entries are evicted before they are ever reported.
    pub cleanup_threshold: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            slow_acquire_threshold: DEFAULT_SLOW_ACQUIRE_THRESHOLD,
            leak_threshold: DEFAULT_LEAK_THRESHOLD,
            leak_check_interval: DEFAULT_LEAK_CHECK_INTERVAL,
            cleanup_threshold: DEFAULT_CLEANUP_THRESHOLD,
        }
    }
}

/// Validated, immutable pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    connect: ConnectOptions,
    diagnostics: DiagnosticsConfig,
}

impl PoolConfig {
    /// Options forwarded to the raw pool.
    #[must_use]
    pub fn connect(&self) -> &ConnectOptions {
        &self.connect
    }

    /// Diagnostics settings.
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsConfig {
        &self.diagnostics
    }
}
