//! Repeater counters shared by the pipeline tasks

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by intake, dispatcher and janitor
#[derive(Debug, Default)]
pub struct RepeaterStats {
    batches_received: AtomicU64,
    frames_received: AtomicU64,
    frames_forwarded: AtomicU64,
    duplicates_dropped: AtomicU64,
    send_failures: AtomicU64,
    wait_failures: AtomicU64,
    evictions: AtomicU64,
}

impl RepeaterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_batch(&self, frames: usize) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.frames_received.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait_failure(&self) {
        self.wait_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            wait_failures: self.wait_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Copy of the repeater counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Non-empty receive polls
    pub batches_received: u64,
    /// Frames taken off the radio
    pub frames_received: u64,
    /// Frames repeated and confirmed sent
    pub frames_forwarded: u64,
    /// Frames dropped as already repeated this epoch
    pub duplicates_dropped: u64,
    /// Frames the TX path refused
    pub send_failures: u64,
    /// Repeats whose completion could not be confirmed
    pub wait_failures: u64,
    /// Duplicate cache clears
    pub evictions: u64,
}

impl StatsSnapshot {
    /// Frames that reached a final outcome in the dispatcher
    pub fn frames_dispatched(&self) -> u64 {
        self.frames_forwarded + self.duplicates_dropped + self.send_failures + self.wait_failures
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx={} (in {} batches) forwarded={} duplicates={} send_failures={} wait_failures={} evictions={}",
            self.frames_received,
            self.batches_received,
            self.frames_forwarded,
            self.duplicates_dropped,
            self.send_failures,
            self.wait_failures,
            self.evictions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = RepeaterStats::new();
        stats.record_batch(3);
        stats.record_forwarded();
        stats.record_duplicate();
        stats.record_send_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.batches_received, 1);
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.frames_dispatched(), 3);
        assert!(snap.to_string().starts_with("rx=3 (in 1 batches) forwarded=1"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let stats = RepeaterStats::new();
        stats.record_eviction();
        let before = stats.snapshot();
        stats.record_eviction();
        stats.record_wait_failure();

        assert_eq!(before.evictions, 1);
        assert_eq!(before, StatsSnapshot { evictions: 1, ..Default::default() });
        assert_eq!(stats.snapshot().evictions, 2);
        assert_eq!(stats.snapshot().frames_dispatched(), 1);
    }
}
