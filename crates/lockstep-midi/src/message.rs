//! MIDI messages relevant to transport sync.

use crate::mtc::{FullFrame, QuarterFrame};
use crate::{Error, Result};
use smallvec::SmallVec;

/// MIDI beat clock pulses per quarter note.
pub const CLOCK_PPQN: u32 = 24;

/// A transport-sync MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMessage {
    QuarterFrame(QuarterFrame),
    FullFrame(FullFrame),
    /// Timing clock (`F8`)
    Clock,
    Start,
    Continue,
    Stop,
    /// Song position pointer in MIDI beats (one beat = 6 clocks)
    SongPosition(u16),
}

impl SyncMessage {
    /// Parse one complete MIDI message.
    ///
    /// Returns `Ok(None)` for messages that carry no sync information
    /// (channel voice, active sensing, unrelated SysEx).
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
        let Some(&status) = bytes.first() else {
            return Ok(None);
        };

        let msg = match status {
            0xF1 => {
                let data = *bytes
                    .get(1)
                    .ok_or_else(|| Error::Parse("quarter frame missing data byte".into()))?;
                SyncMessage::QuarterFrame(QuarterFrame::from_data(data)?)
            }
            0xF2 => {
                if bytes.len() < 3 {
                    return Err(Error::Parse("song position missing data bytes".into()));
                }
                let (lsb, msb) = (bytes[1], bytes[2]);
                if lsb & 0x80 != 0 || msb & 0x80 != 0 {
                    return Err(Error::Parse("song position data has status bit set".into()));
                }
                SyncMessage::SongPosition(((msb as u16) << 7) | lsb as u16)
            }
            0xF8 => SyncMessage::Clock,
            0xFA => SyncMessage::Start,
            0xFB => SyncMessage::Continue,
            0xFC => SyncMessage::Stop,
            0xF0 => match FullFrame::from_sysex(bytes)? {
                Some(frame) => SyncMessage::FullFrame(frame),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> SmallVec<[u8; 10]> {
        let mut out = SmallVec::new();
        match self {
            SyncMessage::QuarterFrame(qf) => out.extend_from_slice(&[0xF1, qf.data()]),
            SyncMessage::FullFrame(frame) => out.extend_from_slice(&frame.to_sysex()),
            SyncMessage::Clock => out.push(0xF8),
            SyncMessage::Start => out.push(0xFA),
            SyncMessage::Continue => out.push(0xFB),
            SyncMessage::Stop => out.push(0xFC),
            SyncMessage::SongPosition(beats) => {
                out.extend_from_slice(&[0xF2, (beats & 0x7F) as u8, ((beats >> 7) & 0x7F) as u8])
            }
        }
        out
    }

    /// True for messages that belong to MIDI Time Code.
    pub fn is_timecode(&self) -> bool {
        matches!(self, SyncMessage::QuarterFrame(_) | SyncMessage::FullFrame(_))
    }
}
