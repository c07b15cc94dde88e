//! The active lease registry.
//!
//! Maps connection ids to metadata about the lease currently holding them.
//! It is written by every acquire and release and read by the leak detector,
//! so all access goes through one mutex that is never held across an await.
//! The registry exists only for diagnostics; the pool does not depend on it
//! for correctness.

use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Metadata about one outstanding lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEntry {
    /// Id of the leased connection.
    pub connection_id: u64,
    /// When the lease was handed out.
    pub acquired_at: Instant,
    /// Route of the request holding the lease, if bound.
    pub route: Option<String>,
    /// Method of the request holding the lease, if bound.
    pub method: Option<String>,
    /// Caller-supplied tag.
    pub info: Option<String>,
}

impl LeaseEntry {
    /// How long the lease had been held at `now`.
    #[must_use]
    pub fn held_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.acquired_at)
    }
}

/// Shared table of outstanding leases.
#[derive(Debug, Default)]
pub struct ActiveLeaseRegistry {
    entries: Mutex<HashMap<u64, LeaseEntry>>,
}

impl ActiveLeaseRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new lease, replacing any stale entry for the same connection.
    pub fn register(&self, entry: LeaseEntry) {
        self.entries.lock().insert(entry.connection_id, entry);
    }

    /// Remove the entry for a connection. Missing entries are ignored.
    pub fn unregister(&self, connection_id: u64) -> Option<LeaseEntry> {
        self.entries.lock().remove(&connection_id)
    }

    /// Attach request context to a live entry.
    ///
    /// Returns `false` if the entry is gone (released or evicted).
    pub fn bind_request(&self, connection_id: u64, route: &str, method: &str) -> bool {
        match self.entries.lock().get_mut(&connection_id) {
            Some(entry) => {
                entry.route = Some(route.to_string());
                entry.method = Some(method.to_string());
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LeaseEntry> {
        self.entries.lock().values().cloned().collect()
    }

    /// Evict the entry for `connection_id` if it still belongs to the lease
    /// acquired at `acquired_at`.
    ///
    /// The check guards against evicting a newer lease of the same
    /// connection that was registered after the caller took its snapshot.
    pub fn evict(&self, connection_id: u64, acquired_at: Instant) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&connection_id) {
            Some(entry) if entry.acquired_at == acquired_at => {
                entries.remove(&connection_id);
                true
            }
            _ => false,
        }
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, connection_id: u64) -> Option<LeaseEntry> {
        self.entries.lock().get(&connection_id).cloned()
    }

    /// Whether a connection has an entry.
    #[must_use]
    pub fn contains(&self, connection_id: u64) -> bool {
        self.entries.lock().contains_key(&connection_id)
    }

    /// Number of tracked leases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no lease is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
