//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by connection managers and carried by [`PoolError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur while configuring, using or stopping a pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Invalid or incomplete pool options.
    ///
    /// Always raised before any pool is created.
    #[error("configuration error: {0}")]
    Config(String),

    /// `init` was called with options while a pool already exists.
    #[error("there is already a pool configured")]
    AlreadyConfigured,

    /// An operation required a pool but none is active.
    #[error("{0}")]
    NotInitialized(&'static str),

    /// The connection manager failed to open a physical connection.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),

    /// Timed out waiting for a free connection.
    #[error("timed out after {0:?} waiting for a connection")]
    AcquireTimeout(Duration),

    /// The raw pool has been drained and no longer hands out connections.
    #[error("pool is closed")]
    Closed,

    /// Closing physical connections during shutdown failed.
    #[error("failed to drain pool: {0}")]
    Drain(#[source] BoxError),
}

impl PoolError {
    /// Message for operations attempted before `init` or after `stop`.
    pub(crate) const NO_POOL: &'static str = "no pool found, call `init` with options first";

    /// Message for `init` called with empty options and no existing pool.
    pub(crate) const NO_POOL_NO_OPTIONS: &'static str =
        "no pool and no options to create one found, call `init` with options first";

    /// Build a configuration error.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure is transient and the caller may retry.
    ///
    /// The pool itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::AcquireTimeout(_))
    }

    /// Whether this error was caused by invalid configuration.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_initialized_messages() {
        let err = PoolError::NotInitialized(PoolError::NO_POOL_NO_OPTIONS);
        assert!(err.to_string().starts_with("no pool and no options"));

        let err = PoolError::NotInitialized(PoolError::NO_POOL);
        assert_eq!(err.to_string(), "no pool found, call `init` with options first");
    }

    #[test]
    fn test_retryable_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(PoolError::Connection(Box::new(io)).is_retryable());
        assert!(PoolError::AcquireTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!PoolError::AlreadyConfigured.is_retryable());
        assert!(!PoolError::config("bad").is_retryable());
        assert!(PoolError::config("bad").is_config());
    }

    #[test]
    fn test_connection_error_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such host");
        let err = PoolError::Connection(Box::new(io));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "connection error: no such host");
    }
}
