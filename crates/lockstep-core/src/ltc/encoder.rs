//! Biphase-mark LTC generator.

use super::frame::{LtcFrame, FRAME_BITS};
use crate::timecode::{SmpteFrameRate, Timecode};

/// Renders LTC frames to audio samples.
///
/// Frame boundaries are kept on a fractional sample grid so non-integer
/// frame durations (29.97 fps at 48 kHz) do not drift.
#[derive(Debug, Clone)]
pub struct LtcEncoder {
    rate: SmpteFrameRate,
    sample_rate: f64,
    amplitude: f32,
    level: f32,
    /// Fractional stream time of the next bit boundary
    clock: f64,
    /// Samples emitted so far
    emitted: u64,
}

impl LtcEncoder {
    pub fn new(rate: SmpteFrameRate, sample_rate: f64) -> Self {
        Self {
            rate,
            sample_rate,
            amplitude: 0.5,
            level: -1.0,
            clock: 0.0,
            emitted: 0,
        }
    }

    /// Peak amplitude (linear, 0..=1).
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn rate(&self) -> SmpteFrameRate {
        self.rate
    }

    pub fn samples_emitted(&self) -> u64 {
        self.emitted
    }

    /// Append one frame carrying `tc`.
    pub fn encode(&mut self, tc: Timecode, out: &mut Vec<f32>) {
        let frame = LtcFrame::from_timecode(tc, self.rate);
        self.encode_frame(&frame, out);
    }

    /// Append `count` consecutive frames starting at `start`.
    pub fn encode_run(&mut self, start: Timecode, count: usize, out: &mut Vec<f32>) {
        for i in 0..count {
            self.encode(start.offset(i as i64, self.rate), out);
        }
    }

    pub fn encode_frame(&mut self, frame: &LtcFrame, out: &mut Vec<f32>) {
        let bit_len = self.rate.samples_per_frame(self.sample_rate) / FRAME_BITS as f64;
        for i in 0..FRAME_BITS {
            // Every cell starts with a transition; ones add one mid-cell
            self.level = -self.level;
            if frame.bit(i) {
                self.fill_until(self.clock + bit_len / 2.0, out);
                self.level = -self.level;
            }
            self.clock += bit_len;
            self.fill_until(self.clock, out);
        }
    }

    fn fill_until(&mut self, until: f64, out: &mut Vec<f32>) {
        let sample = self.level * self.amplitude;
        while (self.emitted as f64) < until {
            out.push(sample);
            self.emitted += 1;
        }
    }
}
