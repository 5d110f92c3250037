//! Transport masters: the time sources a session can chase.
//!
//! Every master publishes its estimate through a [`SnapshotCell`] and is
//! driven once per audio cycle through [`TransportMaster::pre_process`].
//! MIDI-driven masters additionally expose a [`MidiSyncSink`] fed from the
//! MIDI input thread.

mod engine;
mod ltc;
mod midi_clock;
mod mtc;

pub use engine::EngineMaster;
pub use ltc::{LtcAudioInput, LtcMaster};
pub use midi_clock::MidiClockMaster;
pub use mtc::MtcMaster;

use crate::backend::AudioBackend;
use crate::config::MasterConfig;
use crate::manager::RollDisposition;
use crate::snapshot::SnapshotCell;
use crate::timecode::SmpteFrameRate;
use lockstep_midi::SyncMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind tag carried by every master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    /// The audio backend's own transport
    Engine,
    /// Linear timecode on an audio input
    Ltc,
    /// MIDI time code
    Mtc,
    /// MIDI beat clock
    MidiClock,
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncSource::Engine => "Engine",
            SyncSource::Ltc => "LTC",
            SyncSource::Mtc => "MTC",
            SyncSource::MidiClock => "MIDI Clock",
        };
        f.write_str(s)
    }
}

/// Per-cycle inputs handed to [`TransportMaster::pre_process`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleContext {
    pub block_size: u32,
    /// Sample time at the start of this cycle
    pub now: i64,
    /// Session audible position, when known
    pub session_position: Option<i64>,
    pub sample_rate: f64,
    /// Session tempo, used to turn MIDI clock ticks into samples
    pub tempo_bpm: f64,
    /// Session timecode format, used when a source does not announce one
    pub timecode_format: SmpteFrameRate,
}

/// A master's estimate extrapolated to a given sample time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterPosition {
    pub speed: f64,
    /// Position at the queried time
    pub position: i64,
    /// Last position the master published
    pub last_position: i64,
    /// Sample time of `last_position`
    pub last_timestamp: i64,
}

/// A locate the master itself demands (e.g. MTC jumped outside its window).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateRequest {
    pub target: i64,
    pub roll: RollDisposition,
}

/// Receives sync messages on the MIDI input thread.
///
/// `timestamp` is the message arrival in audio sample time.
pub trait MidiSyncSink: Send + Sync {
    fn handle(&self, message: &SyncMessage, timestamp: i64);

    /// Report whether the MIDI port feeding this sink is alive.
    fn set_connected(&self, connected: bool);
}

/// Common capability set of all transport masters.
///
/// Masters sit behind the manager's reader/writer lock, so they are `Sync`;
/// only the writer half (`&mut self`) touches decoder state.
pub trait TransportMaster: Send + Sync {
    fn kind(&self) -> SyncSource;

    fn name(&self) -> &str;

    /// Consume data gathered since the last cycle and refresh the snapshot
    /// and `current_delta`. Called on the audio thread; must not block.
    fn pre_process(&mut self, cycle: &CycleContext);

    /// Latest estimate extrapolated to `now`, or `None` before any data.
    fn speed_and_position(&self, now: i64) -> Option<MasterPosition>;

    /// Drop lock state. With `with_position` the last position is kept.
    fn reset(&mut self, with_position: bool);

    fn locked(&self) -> bool;

    fn ok(&self) -> bool;

    fn usable(&self) -> bool {
        true
    }

    /// Largest tolerable deviation (samples) before a hard relocate.
    fn resolution(&self) -> i64;

    /// Nominal distance (samples) between position updates.
    fn update_interval(&self) -> i64;

    fn requires_seekahead(&self) -> bool {
        false
    }

    fn seekahead_distance(&self) -> i64 {
        0
    }

    /// The source runs off the same sample clock as the audio interface,
    /// so no resampling is ever needed.
    fn sample_clock_synced(&self) -> bool;

    fn set_sample_clock_synced(&mut self, _synced: bool) {}

    fn position_string(&self) -> String;

    fn delta_string(&self) -> String {
        format_delta(self.locked(), self.current_delta())
    }

    /// Signed offset of master against session position, from the last cycle.
    fn current_delta(&self) -> i64;

    /// Shared handle to the published snapshot, for diagnostic readers.
    fn snapshot(&self) -> Arc<SnapshotCell>;

    fn take_locate_request(&mut self) -> Option<LocateRequest> {
        None
    }

    fn midi_sink(&self) -> Option<Arc<dyn MidiSyncSink>> {
        None
    }

    /// Hand out the audio input producer. Only the first call succeeds.
    fn take_audio_input(&mut self) -> Option<LtcAudioInput> {
        None
    }

    /// The audio stream glitched; decoded state may be stale.
    fn resync_xrun(&mut self) {}
}

/// Environment masters are built against.
#[derive(Clone)]
pub struct MasterEnv {
    pub sample_rate: f64,
    pub timecode_format: SmpteFrameRate,
    pub backend: Option<Arc<dyn AudioBackend>>,
}

/// Build a master from its persisted description.
pub fn create_master(config: &MasterConfig, env: &MasterEnv) -> Box<dyn TransportMaster> {
    let mut master: Box<dyn TransportMaster> = match config.kind {
        SyncSource::Engine => Box::new(EngineMaster::new(&config.name, env.backend.clone())),
        SyncSource::Ltc => Box::new(LtcMaster::new(
            &config.name,
            env.sample_rate,
            env.timecode_format,
        )),
        SyncSource::Mtc => Box::new(MtcMaster::new(
            &config.name,
            env.sample_rate,
            env.timecode_format,
        )),
        SyncSource::MidiClock => Box::new(MidiClockMaster::new(&config.name, env.sample_rate)),
    };
    if config.sample_clock_synced {
        master.set_sample_clock_synced(true);
    }
    master
}

/// Read `cell` and extrapolate to `now`. `None` until the first update.
pub(crate) fn position_from(cell: &SnapshotCell, now: i64) -> Option<MasterPosition> {
    if cell.generation() == 0 {
        return None;
    }
    let snap = cell.read();
    Some(MasterPosition {
        speed: snap.speed,
        position: snap.position_at(now),
        last_position: snap.position,
        last_timestamp: snap.timestamp,
    })
}

pub(crate) fn format_delta(locked: bool, delta: i64) -> String {
    if locked {
        format!("\u{0394}{:+}sm", delta)
    } else {
        "--".to_string()
    }
}

pub(crate) const UNLOCKED_TIMECODE: &str = "--:--:--:--";
