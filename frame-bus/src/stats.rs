use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing pipeline activity. Observational only.
#[derive(Debug, Default)]
pub struct PipelineStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
    encoded: AtomicU64,
    delivered: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub dropped: u64,
    pub timeouts: u64,
    pub encoded: u64,
    pub delivered: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of dropped frames, this one included.
    pub(crate) fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_encoded(&self) {
        self.encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, viewers: usize) {
        self.delivered.fetch_add(viewers as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            encoded: self.encoded.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}
