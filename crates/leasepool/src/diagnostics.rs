//! Acquisition-time diagnostics.
//!
//! When diagnostics are enabled, every acquisition is timed and the raw
//! pool's counters are captured at the moment the connection is requested.
//! Acquisitions slower than the configured threshold are flagged and logged.
//! Nothing here can fail: counters the raw pool cannot report are recorded
//! as unknown.

use std::fmt;
use std::time::{Duration, Instant};

use crate::raw::PoolCounters;

/// Diagnostics captured once per acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    counters: PoolCounters,
    acquire_time: Duration,
    slow_acquire: bool,
    info: Option<String>,
}

impl DiagnosticsSnapshot {
    /// Total connections when the acquisition started.
    #[must_use]
    pub fn total(&self) -> Option<usize> {
        self.counters.total
    }

    /// Free connections when the acquisition started.
    #[must_use]
    pub fn free(&self) -> Option<usize> {
        self.counters.free
    }

    /// Connections being opened when the acquisition started.
    #[must_use]
    pub fn acquiring(&self) -> Option<usize> {
        self.counters.acquiring
    }

    /// Waiting callers when the acquisition started.
    #[must_use]
    pub fn queue_length(&self) -> Option<usize> {
        self.counters.queue_length
    }

    /// All counters at once.
    #[must_use]
    pub fn counters(&self) -> PoolCounters {
        self.counters
    }

    /// How long the acquisition took.
    #[must_use]
    pub fn acquire_time(&self) -> Duration {
        self.acquire_time
    }

    /// Acquisition time in whole milliseconds.
    #[must_use]
    pub fn acquire_time_ms(&self) -> u128 {
        self.acquire_time.as_millis()
    }

    /// Whether the acquisition exceeded the slow-acquire threshold.
    #[must_use]
    pub fn is_slow_acquire(&self) -> bool {
        self.slow_acquire
    }

    /// Caller-supplied tag.
    #[must_use]
    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }
}

/// Displays a counter, or `unknown` when the pool could not report it.
pub(crate) struct Counter(pub(crate) Option<usize>);

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{n}"),
            None => f.write_str("unknown"),
        }
    }
}

/// Produces [`DiagnosticsSnapshot`]s for one pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DiagnosticsCollector {
    slow_acquire_threshold: Duration,
}

impl DiagnosticsCollector {
    pub(crate) fn new(slow_acquire_threshold: Duration) -> Self {
        Self {
            slow_acquire_threshold,
        }
    }

    /// Start timing an acquisition.
    pub(crate) fn begin(&self, counters: PoolCounters) -> AcquireTimer {
        AcquireTimer {
            started: Instant::now(),
            counters,
            threshold: self.slow_acquire_threshold,
        }
    }
}

/// An acquisition in flight.
#[derive(Debug)]
pub(crate) struct AcquireTimer {
    started: Instant,
    counters: PoolCounters,
    threshold: Duration,
}

impl AcquireTimer {
    /// Finish timing once the raw pool handed a connection back.
    pub(crate) fn finish(self, connection_id: u64, info: Option<String>) -> DiagnosticsSnapshot {
        let acquire_time = self.started.elapsed();
        let slow_acquire = acquire_time > self.threshold;

        if slow_acquire {
            tracing::warn!(
                target: crate::LOG_TARGET,
                connection_id,
                acquire_ms = acquire_time.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                total = %Counter(self.counters.total),
                free = %Counter(self.counters.free),
                acquiring = %Counter(self.counters.acquiring),
                queue_length = %Counter(self.counters.queue_length),
                info = info.as_deref().unwrap_or(""),
                "slow connection acquire"
            );
        }

        DiagnosticsSnapshot {
            counters: self.counters,
            acquire_time,
            slow_acquire,
            info,
        }
    }
}
