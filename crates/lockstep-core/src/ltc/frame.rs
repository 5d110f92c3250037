//! 80-bit LTC frame layout (SMPTE 12M).
//!
//! Bit 0 is transmitted first. BCD time fields are interleaved with user
//! bits; bits 64..80 hold the sync word.

use crate::timecode::{SmpteFrameRate, Timecode};

/// Bits 64..80 read LSB-first, as seen when the tape runs forward.
pub const SYNC_WORD_FORWARD: u16 = 0xBFFC;

/// The sync word as it lands in the low 16 bits of the shift register when
/// the tape runs backwards.
pub const SYNC_WORD_REVERSE: u16 = 0x3FFD;

pub const FRAME_BITS: usize = 80;

const MASK_80: u128 = (1u128 << FRAME_BITS) - 1;

const DROP_FRAME_BIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LtcFrame {
    bits: u128,
}

impl LtcFrame {
    /// Build a frame for `tc` at `rate`, with sync word and polarity bit set.
    pub fn from_timecode(tc: Timecode, rate: SmpteFrameRate) -> Self {
        let mut frame = Self::default();
        frame.put(0, 4, (tc.frames % 10) as u128);
        frame.put(8, 2, (tc.frames / 10) as u128);
        frame.put(16, 4, (tc.seconds % 10) as u128);
        frame.put(24, 3, (tc.seconds / 10) as u128);
        frame.put(32, 4, (tc.minutes % 10) as u128);
        frame.put(40, 3, (tc.minutes / 10) as u128);
        frame.put(48, 4, (tc.hours % 10) as u128);
        frame.put(56, 2, (tc.hours / 10) as u128);
        if rate.is_drop_frame() {
            frame.bits |= 1 << DROP_FRAME_BIT;
        }
        frame.put(64, 16, SYNC_WORD_FORWARD as u128);

        // Even number of ones keeps every frame starting on the same polarity
        let parity_bit = if rate == SmpteFrameRate::Fps25 { 59 } else { 27 };
        if frame.bits.count_ones() % 2 == 1 {
            frame.bits |= 1 << parity_bit;
        }
        frame
    }

    pub fn from_bits(bits: u128) -> Self {
        Self {
            bits: bits & MASK_80,
        }
    }

    /// Frame received in reverse: undo the bit order.
    pub fn from_reversed_bits(bits: u128) -> Self {
        Self::from_bits(bits.reverse_bits() >> (128 - FRAME_BITS))
    }

    pub fn bits(&self) -> u128 {
        self.bits
    }

    pub fn bit(&self, index: usize) -> bool {
        (self.bits >> index) & 1 == 1
    }

    pub fn drop_frame(&self) -> bool {
        self.bit(DROP_FRAME_BIT as usize)
    }

    pub fn sync_word(&self) -> u16 {
        self.get(64, 16) as u16
    }

    pub fn timecode(&self) -> Timecode {
        Timecode {
            frames: (self.get(8, 2) * 10 + self.get(0, 4)) as u8,
            seconds: (self.get(24, 3) * 10 + self.get(16, 4)) as u8,
            minutes: (self.get(40, 3) * 10 + self.get(32, 4)) as u8,
            hours: (self.get(56, 2) * 10 + self.get(48, 4)) as u8,
        }
    }

    fn get(&self, offset: u32, width: u32) -> u128 {
        (self.bits >> offset) & ((1 << width) - 1)
    }

    fn put(&mut self, offset: u32, width: u32, value: u128) {
        let mask = ((1u128 << width) - 1) << offset;
        self.bits = (self.bits & !mask) | ((value << offset) & mask);
    }
}
