//! Seqlock-guarded (position, timestamp, speed) snapshot.
//!
//! Each transport master publishes its latest estimate through one
//! [`SnapshotCell`]. The writer never blocks; readers retry until they
//! observe a consistent copy.
//!
//! # Memory ordering
//!
//! Writer (externally serialized, one writer at a time):
//!
//! 1. `guard1 += 1` (relaxed), then a release fence
//! 2. store the fields (relaxed)
//! 3. `guard2 = guard1` with release ordering
//!
//! Reader:
//!
//! 1. load `guard2` with acquire ordering
//! 2. load the fields (relaxed), then an acquire fence
//! 3. load `guard1` (relaxed)
//!
//! The copy is valid only if both guard values match. Reading `guard2`
//! first matters: a reader that sees the closing guard of update N and,
//! after the fence, the opening guard of the same update cannot have
//! observed any field written by update N+1.

use atomic_float::AtomicF64;
use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Reads that fail this many times in a row back off with a short sleep.
pub const MAX_READ_RETRIES: u32 = 10;

const READ_BACKOFF: Duration = Duration::from_micros(20);

/// A consistent copy of a master's published state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    /// Master position in samples at `timestamp`
    pub position: i64,
    /// Audio sample time at which `position` was valid
    pub timestamp: i64,
    /// Master speed (1.0 = nominal forward, negative = reverse)
    pub speed: f64,
}

impl Snapshot {
    /// Extrapolate the master position to sample time `now`.
    #[inline]
    pub fn position_at(&self, now: i64) -> i64 {
        let elapsed = (now - self.timestamp) as f64;
        self.position + (elapsed * self.speed).round() as i64
    }
}

/// Seqlock container for a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotCell {
    guard1: AtomicU64,
    position: AtomicI64,
    timestamp: AtomicI64,
    speed: AtomicF64,
    guard2: AtomicU64,
    retries: AtomicU64,
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self {
            guard1: AtomicU64::new(0),
            position: AtomicI64::new(0),
            timestamp: AtomicI64::new(0),
            speed: AtomicF64::new(0.0),
            guard2: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Publish a new value. Wait-free.
    ///
    /// Callers must not race each other: each cell has exactly one writer at
    /// any moment (the owning decoder, or whoever holds its decoder lock).
    #[inline]
    pub fn update(&self, position: i64, timestamp: i64, speed: f64) {
        let seq = self.guard1.load(Ordering::Relaxed).wrapping_add(1);
        self.guard1.store(seq, Ordering::Relaxed);
        fence(Ordering::Release);

        self.position.store(position, Ordering::Relaxed);
        self.timestamp.store(timestamp, Ordering::Relaxed);
        self.speed.store(speed, Ordering::Relaxed);

        self.guard2.store(seq, Ordering::Release);
    }

    /// Read a consistent copy, retrying on concurrent writes.
    ///
    /// After [`MAX_READ_RETRIES`] consecutive failures the reader logs, sleeps
    /// briefly and starts counting again. It never gives up and never panics.
    pub fn read(&self) -> Snapshot {
        let mut tries = 0u32;
        loop {
            let closing = self.guard2.load(Ordering::Acquire);
            let snapshot = Snapshot {
                position: self.position.load(Ordering::Relaxed),
                timestamp: self.timestamp.load(Ordering::Relaxed),
                speed: self.speed.load(Ordering::Relaxed),
            };
            fence(Ordering::Acquire);
            let opening = self.guard1.load(Ordering::Relaxed);

            if opening == closing {
                return snapshot;
            }

            self.retries.fetch_add(1, Ordering::Relaxed);
            tries += 1;
            if tries >= MAX_READ_RETRIES {
                warn!(
                    "Snapshot read retried {} times under contention, backing off",
                    tries
                );
                std::thread::sleep(READ_BACKOFF);
                tries = 0;
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Zero all fields.
    pub fn clear(&self) {
        self.update(0, 0, 0.0);
    }

    /// Number of failed read attempts since creation.
    pub fn read_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Number of completed updates.
    pub fn generation(&self) -> u64 {
        self.guard2.load(Ordering::Acquire)
    }
}
