//! Biphase-mark LTC decoder.
//!
//! Zero crossings delimit bit cells. A cell with no mid-cell crossing is a
//! zero; two half-length intervals make a one. The bit length estimate is
//! smoothed so the decoder follows varispeed playback.

use super::frame::{LtcFrame, FRAME_BITS, SYNC_WORD_FORWARD, SYNC_WORD_REVERSE};

const MASK_80: u128 = (1u128 << FRAME_BITS) - 1;

/// Signal must cross ±this level to count as an edge.
const HYSTERESIS: f32 = 0.01;

/// Bit length is seeded for 25 fps, which classifies 23.976..30 fps correctly.
const SEED_FPS: f64 = 25.0;

/// A frame recovered from the audio stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    pub frame: LtcFrame,
    /// Tape ran backwards while this frame was read
    pub reverse: bool,
    /// Sample time of the first received bit
    pub start: i64,
    /// Sample time just after the last received bit
    pub end: i64,
}

#[derive(Debug, Clone)]
pub struct LtcDecoder {
    sample_rate: f64,
    level_high: bool,
    last_edge: Option<i64>,
    bit_len: f64,
    /// Start of a one-bit whose first half has been seen
    half_start: Option<i64>,
    reg: u128,
    bit_starts: [i64; FRAME_BITS],
    bits_seen: usize,
    frames_decoded: u64,
}

impl LtcDecoder {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            level_high: false,
            last_edge: None,
            bit_len: sample_rate / (SEED_FPS * FRAME_BITS as f64),
            half_start: None,
            reg: 0,
            bit_starts: [0; FRAME_BITS],
            bits_seen: 0,
            frames_decoded: 0,
        }
    }

    /// Forget all edge and bit state (after an xrun or a gap in the input).
    pub fn reset(&mut self) {
        *self = Self::new(self.sample_rate);
    }

    /// Current bit length estimate in samples.
    pub fn bit_length(&self) -> f64 {
        self.bit_len
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Decode `samples`, the first of which sits at sample time `start_time`.
    pub fn feed<F>(&mut self, samples: &[f32], start_time: i64, mut on_frame: F)
    where
        F: FnMut(DecodedFrame),
    {
        for (i, &s) in samples.iter().enumerate() {
            let crossed = if self.level_high {
                s < -HYSTERESIS
            } else {
                s > HYSTERESIS
            };
            if crossed {
                self.level_high = !self.level_high;
                self.edge(start_time + i as i64, &mut on_frame);
            }
        }
    }

    fn edge<F: FnMut(DecodedFrame)>(&mut self, at: i64, on_frame: &mut F) {
        let Some(prev) = self.last_edge.replace(at) else {
            return;
        };
        let interval = (at - prev) as f64;

        if interval > 0.75 * self.bit_len && interval <= 1.6 * self.bit_len {
            // A lone half followed by a full cell means we were misaligned
            self.half_start = None;
            self.bit_len = 0.75 * self.bit_len + 0.25 * interval;
            self.push_bit(false, prev, at, on_frame);
        } else if interval > 0.25 * self.bit_len && interval <= 0.75 * self.bit_len {
            match self.half_start.take() {
                Some(start) => {
                    self.bit_len = 0.75 * self.bit_len + 0.25 * (at - start) as f64;
                    self.push_bit(true, start, at, on_frame);
                }
                None => self.half_start = Some(prev),
            }
        } else {
            // Dropout or noise: start over, keeping the rate estimate
            self.half_start = None;
            self.reg = 0;
            self.bits_seen = 0;
        }
    }

    fn push_bit<F: FnMut(DecodedFrame)>(&mut self, bit: bool, start: i64, end: i64, on_frame: &mut F) {
        self.reg = ((self.reg >> 1) | ((bit as u128) << (FRAME_BITS - 1))) & MASK_80;
        self.bit_starts[self.bits_seen % FRAME_BITS] = start;
        self.bits_seen += 1;
        if self.bits_seen < FRAME_BITS {
            return;
        }

        let first_start = self.bit_starts[self.bits_seen % FRAME_BITS];
        let frame = if (self.reg >> 64) as u16 == SYNC_WORD_FORWARD {
            Some((LtcFrame::from_bits(self.reg), false))
        } else if self.reg as u16 == SYNC_WORD_REVERSE {
            Some((LtcFrame::from_reversed_bits(self.reg), true))
        } else {
            None
        };

        if let Some((frame, reverse)) = frame {
            self.frames_decoded += 1;
            on_frame(DecodedFrame {
                frame,
                reverse,
                start: first_start,
                end,
            });
        }
    }
}
