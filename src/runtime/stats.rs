//! Server counters.
//!
//! Only the event loop thread writes these; atomics let other threads
//! (tests, embedders) read them while the loop runs.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    violations: AtomicU64,
    peer_closed: AtomicU64,
    io_errors: AtomicU64,
    active: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections given a slot.
    pub accepted: u64,
    /// Connections closed at accept time because the table was full.
    pub rejected: u64,
    pub completed: u64,
    pub violations: u64,
    pub peer_closed: u64,
    pub io_errors: u64,
    /// Connections currently holding a slot.
    pub active: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.release();
    }

    pub(crate) fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        self.release();
    }

    pub(crate) fn record_peer_closed(&self) {
        self.peer_closed.fetch_add(1, Ordering::Relaxed);
        self.release();
    }

    pub(crate) fn record_io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
        self.release();
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            peer_closed: self.peer_closed.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_active_gauge() {
        let stats = Stats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_rejected();

        stats.record_completed();
        stats.record_violation();

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 3);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.violations, 1);
        assert_eq!(snap.active, 1);

        stats.record_peer_closed();
        assert_eq!(stats.snapshot().active, 0);
    }
}
