//! Mapping between wall-clock time and audio sample time.
//!
//! The audio thread publishes `(sample_time, micros)` at the top of every
//! cycle. MIDI input threads use the latest pair to stamp incoming messages
//! in the sample domain.

use crate::snapshot::SnapshotCell;
use std::time::Instant;

pub struct SampleClock {
    epoch: Instant,
    sample_rate: f64,
    /// position = sample time, timestamp = micros since epoch
    anchor: SnapshotCell,
}

impl SampleClock {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            epoch: Instant::now(),
            sample_rate,
            anchor: SnapshotCell::new(),
        }
    }

    /// Microseconds since this clock was created.
    pub fn micros(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// Record that the cycle starting at `sample_time` began now. Audio thread only.
    pub fn publish(&self, sample_time: i64) {
        self.publish_at(sample_time, self.micros());
    }

    pub fn publish_at(&self, sample_time: i64, micros: i64) {
        self.anchor.update(sample_time, micros, self.sample_rate / 1_000_000.0);
    }

    /// Sample time corresponding to wall-clock `micros`.
    pub fn sample_time_at(&self, micros: i64) -> i64 {
        self.anchor.read().position_at(micros)
    }

    /// Sample time of the present instant.
    pub fn now(&self) -> i64 {
        self.sample_time_at(self.micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_micros_to_samples() {
        let clock = SampleClock::new(48_000.0);
        clock.publish_at(96_000, 1_000_000);
        assert_eq!(clock.sample_time_at(1_000_000), 96_000);
        assert_eq!(clock.sample_time_at(1_010_000), 96_480);
        assert_eq!(clock.sample_time_at(990_000), 95_520);
    }

    #[test]
    fn test_now_advances() {
        let clock = SampleClock::new(48_000.0);
        clock.publish(0);
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now() > a);
    }
}
