//! Second-order delay-locked loop.
//!
//! A critically damped loop that turns a per-update position error into a
//! smoothed position and speed estimate. Used at two levels:
//!
//! - inside each decoder, tracking the arrival time of timecode events
//!   (`cycle_size` is the nominal event period)
//! - in the manager, tracking master position against the session position
//!   (`cycle_size` is the audio block size)
//!
//! Coefficients follow `ω = 2π·cycle/(2·sr)`, `b = √2·ω`, `c = ω²`.

use std::f64::consts::{PI, SQRT_2};

/// Speeds within this distance of ±1.0 snap to exactly ±1.0.
pub const SPEED_DEADBAND: f64 = 0.001;

/// Estimated speeds beyond this magnitude are treated as divergence.
pub const MAX_SPEED: f64 = 10.0;

/// One DLL output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DllEstimate {
    /// Filtered position of the current update
    pub position: f64,
    /// Filtered speed relative to `cycle_size` per update
    pub speed: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Dll {
    t0: f64,
    t1: f64,
    e2: f64,
    b: f64,
    c: f64,
    cycle: f64,
    initialized: bool,
}

impl Dll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the loop.
    ///
    /// `speed` is the initial speed estimate, `position` the current position,
    /// `cycle_size` the nominal distance between updates (samples).
    pub fn init(&mut self, speed: f64, position: f64, cycle_size: f64, sample_rate: f64) {
        let omega = 2.0 * PI * cycle_size / (2.0 * sample_rate);
        self.b = SQRT_2 * omega;
        self.c = omega * omega;
        self.cycle = cycle_size;

        self.e2 = speed * cycle_size;
        self.t0 = position;
        self.t1 = position + self.e2;
        self.initialized = true;
    }

    /// Feed one error sample.
    ///
    /// Returns `None` if the loop is not initialized, or if the estimate
    /// diverged (`|speed| > MAX_SPEED`). A diverged loop resets itself and
    /// must be re-initialized by the caller.
    pub fn step(&mut self, error: f64) -> Option<DllEstimate> {
        if !self.initialized {
            return None;
        }

        self.t0 = self.t1;
        self.t1 += self.b * error + self.e2;
        self.e2 += self.c * error;

        let speed = (self.t1 - self.t0) / self.cycle;
        if !speed.is_finite() || speed.abs() > MAX_SPEED {
            self.reset();
            return None;
        }

        Some(DllEstimate {
            position: self.t0,
            speed: apply_deadband(speed),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Position the loop expects at the next update.
    pub fn predicted(&self) -> f64 {
        self.t1
    }

    /// The `(b, c)` loop coefficients.
    pub fn coefficients(&self) -> (f64, f64) {
        (self.b, self.c)
    }
}

/// Snap speeds inside the ±0.1% band around ±1.0 to exactly ±1.0.
#[inline]
pub fn apply_deadband(speed: f64) -> f64 {
    if (speed.abs() - 1.0).abs() < SPEED_DEADBAND {
        speed.signum()
    } else {
        speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const SR: f64 = 48_000.0;
    const BLOCK: f64 = 512.0;

    #[test]
    fn test_coefficients() {
        let mut dll = Dll::new();
        dll.init(1.0, 0.0, BLOCK, SR);
        let omega = 2.0 * PI * BLOCK / (2.0 * SR);
        let (b, c) = dll.coefficients();
        assert_relative_eq!(b, SQRT_2 * omega);
        assert_relative_eq!(c, omega * omega);
        assert_eq!(dll.predicted(), BLOCK);
    }

    #[test]
    fn test_zero_error_never_drifts() {
        let mut dll = Dll::new();
        dll.init(1.0, 0.0, BLOCK, SR);
        for _ in 0..100_000 {
            let est = dll.step(0.0).unwrap();
            assert_eq!(est.speed, 1.0);
        }
    }

    #[test]
    fn test_uninitialized_step_is_none() {
        let mut dll = Dll::new();
        assert!(dll.step(0.0).is_none());
    }

    #[test]
    fn test_divergence_resets() {
        let mut dll = Dll::new();
        dll.init(1.0, 0.0, BLOCK, SR);
        assert!(dll.step(1.0e7).is_none());
        assert!(!dll.is_initialized());
        assert!(dll.step(0.0).is_none());
    }

    #[test]
    fn test_tracks_faster_master() {
        let mut dll = Dll::new();
        dll.init(1.0, 0.0, BLOCK, SR);

        let mut master = 0.0;
        let mut local = 0.0;
        let mut speed = 1.0;
        let mut error = f64::MAX;
        for _ in 0..600 {
            master += 1.01 * BLOCK;
            // Both sides at the start of the cycle
            error = master - local;
            let est = dll.step(error).unwrap();
            speed = est.speed;
            local += speed * BLOCK;
        }
        assert_relative_eq!(speed, 1.01, epsilon = 1e-4);
        assert!(error.abs() < 1.0, "error {error}");
    }

    #[test]
    fn test_tracks_event_period() {
        // Events every 480 samples arriving every 481.2 samples
        let mut dll = Dll::new();
        dll.init(1.0, 0.0, 480.0, SR);
        let mut arrival = 0.0;
        let mut est = None;
        for _ in 0..400 {
            arrival += 481.2;
            let error = arrival - dll.predicted();
            est = dll.step(error);
        }
        assert_relative_eq!(est.unwrap().speed, 481.2 / 480.0, epsilon = 1e-5);
    }

    #[test]
    fn test_deadband_negative() {
        assert_eq!(apply_deadband(-1.0009), -1.0);
        assert_eq!(apply_deadband(-0.5), -0.5);
        assert_eq!(apply_deadband(1.002), 1.002);
        assert_eq!(apply_deadband(0.0), 0.0);
    }

    proptest! {
        #[test]
        fn deadband_collapses_to_unity(speed in 0.99901f64..1.00099f64) {
            prop_assert_eq!(apply_deadband(speed), 1.0);
        }

        #[test]
        fn step_speed_in_band_is_exact(initial in 0.9991f64..1.0009f64) {
            let mut dll = Dll::new();
            dll.init(initial, 0.0, BLOCK, SR);
            let est = dll.step(0.0).unwrap();
            prop_assert_eq!(est.speed, 1.0);
        }
    }
}
