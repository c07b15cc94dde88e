//! # leasepool
//!
//! Bounded database connection pool with per-lease diagnostics and leak
//! detection.
//!
//! The pool lends physical connections to concurrent callers as [`Lease`]s.
//! With diagnostics enabled it additionally:
//!
//! - times every acquisition and flags slow ones,
//! - records outstanding leases in an [`ActiveLeaseRegistry`],
//! - sweeps that registry in the background, warning about leases held past
//!   the leak threshold and evicting entries past the cleanup threshold.
//!
//! The wire protocol is not part of this crate: physical connections come
//! from a [`ConnectionManager`] supplied by the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use leasepool::{GetConnectionOptions, PoolController, PoolOptions};
//!
//! let controller = PoolController::with_manager(MyManager::default());
//!
//! controller
//!     .init(
//!         PoolOptions::new()
//!             .host("localhost")
//!             .user("root")
//!             .database("test")
//!             .pool_diagnostics(true)
//!             .leak_threshold_ms(30_000),
//!     )
//!     .await?;
//!
//! let mut lease = controller
//!     .get_connection(GetConnectionOptions::new().info("orders"))
//!     .await?;
//! lease.bind_request("/orders", "POST");
//! lease.execute("INSERT INTO orders DEFAULT VALUES").await?;
//! lease.release();
//!
//! controller.stop().await?;
//! ```
//!
//! ## Logging
//!
//! All events are emitted through `tracing` with the target
//! [`LOG_TARGET`]. Installing a subscriber is left to the application.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod leak;
pub mod lease;
pub mod lifecycle;
pub mod pool;
pub mod raw;
pub mod registry;

/// `tracing` target for every event this crate emits.
pub const LOG_TARGET: &str = "leasepool";

// Configuration
pub use config::{ConnectOptions, ConnectTarget, DiagnosticsConfig, PoolConfig, PoolOptions};

// Error types
pub use error::{BoxError, PoolError, Result};

// Pool types
pub use lease::{GetConnectionOptions, Lease};
pub use lifecycle::PoolController;
pub use pool::{LeasePool, PoolMetrics, PoolStatus};
pub use raw::{BoundedPool, ConnectionManager, PoolCounters, RawConnection, RawPool};

// Diagnostics
pub use diagnostics::DiagnosticsSnapshot;
pub use leak::{LeakDetector, LeakDetectorHandle, LeakReport, SweepReport};
pub use registry::{ActiveLeaseRegistry, LeaseEntry};
