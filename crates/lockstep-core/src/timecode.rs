//! SMPTE timecode arithmetic.

use lockstep_midi::MtcRate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SMPTE frame rate for MTC/LTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SmpteFrameRate {
    /// 23.976 fps (film pulled down for NTSC)
    #[serde(rename = "23.976")]
    Fps23976,
    /// 24 fps (film)
    #[serde(rename = "24")]
    Fps24,
    /// 25 fps (PAL video)
    #[default]
    #[serde(rename = "25")]
    Fps25,
    /// 29.97 fps drop-frame (NTSC video)
    #[serde(rename = "29.97df")]
    Fps2997Df,
    /// 30 fps (audio/music)
    #[serde(rename = "30")]
    Fps30,
}

impl SmpteFrameRate {
    pub const ALL: [SmpteFrameRate; 5] = [
        SmpteFrameRate::Fps23976,
        SmpteFrameRate::Fps24,
        SmpteFrameRate::Fps25,
        SmpteFrameRate::Fps2997Df,
        SmpteFrameRate::Fps30,
    ];

    /// Get frames per second as f64.
    pub fn fps(&self) -> f64 {
        match self {
            SmpteFrameRate::Fps23976 => 24000.0 / 1001.0,
            SmpteFrameRate::Fps24 => 24.0,
            SmpteFrameRate::Fps25 => 25.0,
            SmpteFrameRate::Fps2997Df => 30000.0 / 1001.0,
            SmpteFrameRate::Fps30 => 30.0,
        }
    }

    /// Frame labels per second (the `FF` field wraps at this value).
    pub fn nominal_fps(&self) -> u32 {
        match self {
            SmpteFrameRate::Fps23976 | SmpteFrameRate::Fps24 => 24,
            SmpteFrameRate::Fps25 => 25,
            SmpteFrameRate::Fps2997Df | SmpteFrameRate::Fps30 => 30,
        }
    }

    /// Check if drop-frame.
    pub fn is_drop_frame(&self) -> bool {
        matches!(self, SmpteFrameRate::Fps2997Df)
    }

    /// Duration of one frame in samples.
    pub fn samples_per_frame(&self, sample_rate: f64) -> f64 {
        sample_rate / self.fps()
    }

    /// Frames in 24 hours.
    pub fn frames_per_day(&self) -> i64 {
        let nominal = self.nominal_fps() as i64 * 86_400;
        if self.is_drop_frame() {
            // 2 labels dropped in 9 of every 10 minutes
            nominal - 2 * (24 * 60 - 24 * 6)
        } else {
            nominal
        }
    }

    pub fn from_mtc(rate: MtcRate) -> Self {
        match rate {
            MtcRate::Fps24 => SmpteFrameRate::Fps24,
            MtcRate::Fps25 => SmpteFrameRate::Fps25,
            MtcRate::Fps2997Df => SmpteFrameRate::Fps2997Df,
            MtcRate::Fps30 => SmpteFrameRate::Fps30,
        }
    }

    /// MTC has no 23.976 code; it is sent as 24.
    pub fn to_mtc(&self) -> MtcRate {
        match self {
            SmpteFrameRate::Fps23976 | SmpteFrameRate::Fps24 => MtcRate::Fps24,
            SmpteFrameRate::Fps25 => MtcRate::Fps25,
            SmpteFrameRate::Fps2997Df => MtcRate::Fps2997Df,
            SmpteFrameRate::Fps30 => MtcRate::Fps30,
        }
    }
}

impl fmt::Display for SmpteFrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmpteFrameRate::Fps23976 => "23.976",
            SmpteFrameRate::Fps24 => "24",
            SmpteFrameRate::Fps25 => "25",
            SmpteFrameRate::Fps2997Df => "29.97df",
            SmpteFrameRate::Fps30 => "30",
        };
        f.write_str(s)
    }
}

/// An SMPTE time label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl Timecode {
    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
        }
    }

    /// Whether this label exists at `rate` (drop-frame skips `;00` and `;01`
    /// at the start of each minute not divisible by ten).
    pub fn is_valid(&self, rate: SmpteFrameRate) -> bool {
        if self.hours > 23
            || self.minutes > 59
            || self.seconds > 59
            || self.frames as u32 >= rate.nominal_fps()
        {
            return false;
        }
        !(rate.is_drop_frame() && self.seconds == 0 && self.frames < 2 && self.minutes % 10 != 0)
    }

    /// Frames elapsed since 00:00:00:00.
    pub fn frame_number(&self, rate: SmpteFrameRate) -> i64 {
        let nominal = rate.nominal_fps() as i64;
        let total_seconds =
            self.hours as i64 * 3600 + self.minutes as i64 * 60 + self.seconds as i64;
        let mut n = total_seconds * nominal + self.frames as i64;
        if rate.is_drop_frame() {
            let total_minutes = self.hours as i64 * 60 + self.minutes as i64;
            n -= 2 * (total_minutes - total_minutes / 10);
        }
        n
    }

    /// Label for a frame count, wrapping at 24 hours.
    pub fn from_frame_number(frame: i64, rate: SmpteFrameRate) -> Self {
        let mut n = frame.rem_euclid(rate.frames_per_day());
        if rate.is_drop_frame() {
            let ten_minutes = n / 17_982;
            let rem = n % 17_982;
            n += 18 * ten_minutes;
            if rem >= 2 {
                n += 2 * ((rem - 2) / 1798);
            }
        }
        let nominal = rate.nominal_fps() as i64;
        Self {
            hours: (n / (nominal * 3600)) as u8,
            minutes: ((n / (nominal * 60)) % 60) as u8,
            seconds: ((n / nominal) % 60) as u8,
            frames: (n % nominal) as u8,
        }
    }

    /// Sample position of the start of this frame.
    pub fn to_samples(&self, rate: SmpteFrameRate, sample_rate: f64) -> i64 {
        (self.frame_number(rate) as f64 * rate.samples_per_frame(sample_rate)).round() as i64
    }

    /// Label of the frame containing `samples`.
    pub fn from_samples(samples: i64, rate: SmpteFrameRate, sample_rate: f64) -> Self {
        let frame = (samples as f64 / rate.samples_per_frame(sample_rate)).floor() as i64;
        Self::from_frame_number(frame, rate)
    }

    /// The label `delta` frames away.
    pub fn offset(&self, delta: i64, rate: SmpteFrameRate) -> Self {
        Self::from_frame_number(self.frame_number(rate) + delta, rate)
    }

    /// Format as `HH:MM:SS:FF`, with `;` before the frames for drop-frame.
    pub fn display(&self, rate: SmpteFrameRate) -> String {
        let sep = if rate.is_drop_frame() { ';' } else { ':' };
        format!(
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}
