//! Time sources.
//!
//! The engine never reads the wall clock directly; it asks a [`Clock`], so
//! tests can drive time by hand and outbox ordering stays deterministic.

use crate::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of millisecond timestamps.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since epoch.
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `chrono`.
///
/// Never goes backwards across calls, even if the system clock does: a
/// reading older than the previous one is bumped to it.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = chrono::Utc::now().timestamp_millis().max(0) as Timestamp;
        let previous = self.last.fetch_max(wall, Ordering::SeqCst);
        previous.max(wall)
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at the given timestamp.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move time forward and return the new value.
    pub fn advance(&self, millis: u64) -> Timestamp {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }

    /// Jump to an absolute time.
    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
