//! Butler counters.
//!
//! Written from both the audio thread (drops, queue depth) and the butler
//! (completions), so everything is a relaxed atomic.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct ButlerMetrics {
    /// Locates the butler has settled
    locates: AtomicU64,
    /// Disk refills performed
    refills: AtomicU64,
    /// Requests the audio thread could not enqueue
    dropped_requests: AtomicU64,
    /// Deepest the command queue has been
    queue_high_water: AtomicU64,
}

impl ButlerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_locate(&self) {
        self.locates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_refill(&self) {
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queue_depth(&self, depth: usize) {
        self.queue_high_water
            .fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub fn dropped_requests(&self) -> u64 {
        self.dropped_requests.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ButlerMetricsSnapshot {
        ButlerMetricsSnapshot {
            locates: self.locates.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            dropped_requests: self.dropped_requests.load(Ordering::Relaxed),
            queue_high_water: self.queue_high_water.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.locates.store(0, Ordering::Relaxed);
        self.refills.store(0, Ordering::Relaxed);
        self.dropped_requests.store(0, Ordering::Relaxed);
        self.queue_high_water.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`ButlerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButlerMetricsSnapshot {
    pub locates: u64,
    pub refills: u64,
    pub dropped_requests: u64,
    pub queue_high_water: u64,
}
