//! MIDI Time Code message types.

use crate::{Error, Result};

/// Frame-rate code carried by MTC (quarter-frame piece 7 and full-frame hours byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MtcRate {
    Fps24 = 0,
    Fps25 = 1,
    /// 29.97 fps drop-frame
    Fps2997Df = 2,
    Fps30 = 3,
}

impl MtcRate {
    /// Decode a rate code. Values outside 0..=3 are not a valid MTC rate.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MtcRate::Fps24),
            1 => Some(MtcRate::Fps25),
            2 => Some(MtcRate::Fps2997Df),
            3 => Some(MtcRate::Fps30),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Nominal (integer) frame count per second.
    pub fn nominal_fps(self) -> u8 {
        match self {
            MtcRate::Fps24 => 24,
            MtcRate::Fps25 => 25,
            MtcRate::Fps2997Df | MtcRate::Fps30 => 30,
        }
    }
}

/// One MTC quarter-frame message (`F1 0nnndddd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuarterFrame {
    piece: u8,
    value: u8,
}

impl QuarterFrame {
    pub fn new(piece: u8, value: u8) -> Result<Self> {
        if piece > 7 || value > 0x0F {
            return Err(Error::Parse(format!(
                "quarter frame out of range: piece={piece} value={value}"
            )));
        }
        Ok(Self { piece, value })
    }

    /// Decode the data byte of an `F1` message.
    pub fn from_data(data: u8) -> Result<Self> {
        if data & 0x80 != 0 {
            return Err(Error::Parse(format!("invalid quarter frame data {data:#04x}")));
        }
        Ok(Self {
            piece: data >> 4,
            value: data & 0x0F,
        })
    }

    pub fn data(&self) -> u8 {
        (self.piece << 4) | self.value
    }

    /// Piece index 0..=7.
    pub fn piece(&self) -> u8 {
        self.piece
    }

    /// Low nibble payload.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// The eight quarter frames describing `frame`, in forward transmission order.
    pub fn sequence(frame: &FullFrame) -> [QuarterFrame; 8] {
        let values = [
            frame.frames & 0x0F,
            (frame.frames >> 4) & 0x01,
            frame.seconds & 0x0F,
            (frame.seconds >> 4) & 0x03,
            frame.minutes & 0x0F,
            (frame.minutes >> 4) & 0x03,
            frame.hours & 0x0F,
            ((frame.hours >> 4) & 0x01) | (frame.rate.code() << 1),
        ];
        let mut out = [QuarterFrame { piece: 0, value: 0 }; 8];
        for (piece, value) in values.into_iter().enumerate() {
            out[piece] = QuarterFrame {
                piece: piece as u8,
                value,
            };
        }
        out
    }
}

/// A complete SMPTE time as carried by an MTC full-frame SysEx message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullFrame {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub rate: MtcRate,
}

impl FullFrame {
    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8, rate: MtcRate) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
            rate,
        }
    }

    /// Parse `F0 7F <device> 01 01 hh mm ss ff F7`.
    ///
    /// Returns `Ok(None)` for any other SysEx.
    pub fn from_sysex(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < 4 || bytes[0] != 0xF0 || bytes[1] != 0x7F {
            return Ok(None);
        }
        if bytes.len() < 5 || bytes[3] != 0x01 || bytes[4] != 0x01 {
            return Ok(None);
        }
        if bytes.len() != 10 || bytes[9] != 0xF7 {
            return Err(Error::Parse(format!(
                "truncated MTC full frame ({} bytes)",
                bytes.len()
            )));
        }

        let hh = bytes[5];
        // Two rate bits can never be out of range here
        let rate = MtcRate::from_code((hh >> 5) & 0x03).unwrap_or(MtcRate::Fps30);
        let frame = Self {
            hours: hh & 0x1F,
            minutes: bytes[6],
            seconds: bytes[7],
            frames: bytes[8],
            rate,
        };
        if frame.minutes > 59 || frame.seconds > 59 || frame.frames >= frame.rate.nominal_fps() {
            return Err(Error::Parse(format!("MTC full frame out of range: {frame:?}")));
        }
        Ok(Some(frame))
    }

    /// Encode as a full-frame SysEx addressed to all devices.
    pub fn to_sysex(&self) -> [u8; 10] {
        [
            0xF0,
            0x7F,
            0x7F,
            0x01,
            0x01,
            (self.rate.code() << 5) | (self.hours & 0x1F),
            self.minutes,
            self.seconds,
            self.frames,
            0xF7,
        ]
    }
}
