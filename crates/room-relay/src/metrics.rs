//! Relay-wide counters.
//!
//! Plain atomics read by logs and tests; there is no exporter. Gauges may
//! briefly disagree with actor state since actors update them after the
//! fact.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared across the registry, room, and relay actors.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Live rooms.
    rooms: AtomicUsize,
    /// Connected sessions.
    sessions: AtomicUsize,
    /// Payloads forwarded to a reachable target.
    signals_relayed: AtomicU64,
    /// Payloads dropped (unknown target or saturated queue).
    signals_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Create a fresh metrics handle.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_opened(&self) {
        self.rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_closed(&self) {
        self.rooms.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_connected(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_disconnected(&self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn signal_relayed(&self) {
        self.signals_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signal_dropped(&self) {
        self.signals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current live room count.
    #[must_use]
    pub fn rooms(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    /// Current connected session count.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Total payloads forwarded.
    #[must_use]
    pub fn signals_relayed(&self) -> u64 {
        self.signals_relayed.load(Ordering::Relaxed)
    }

    /// Total payloads dropped.
    #[must_use]
    pub fn signals_dropped(&self) -> u64 {
        self.signals_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_track_open_close() {
        let metrics = RelayMetrics::new();
        metrics.room_opened();
        metrics.room_opened();
        metrics.room_closed();
        assert_eq!(metrics.rooms(), 1);

        metrics.session_connected();
        metrics.session_disconnected();
        assert_eq!(metrics.sessions(), 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = RelayMetrics::new();
        metrics.signal_relayed();
        metrics.signal_relayed();
        metrics.signal_dropped();
        assert_eq!(metrics.signals_relayed(), 2);
        assert_eq!(metrics.signals_dropped(), 1);
    }
}
