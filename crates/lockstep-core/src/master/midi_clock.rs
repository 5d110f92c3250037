//! MIDI beat clock master.
//!
//! Ticks arrive at 24 per quarter note. Position is the tick count mapped
//! through the session tempo; speed is the measured tick rate against the
//! rate that tempo implies.

use super::{
    format_delta, position_from, CycleContext, MasterPosition, MidiSyncSink, SyncSource,
    TransportMaster,
};
use crate::dll::Dll;
use crate::lockfree::AtomicFlag;
use crate::snapshot::SnapshotCell;
use lockstep_midi::{SyncMessage, CLOCK_PPQN};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ticks after Start/Continue before the measured rate is trusted.
const LOCK_TICKS: u32 = 4;

/// MIDI beats (sixteenths) to clock ticks.
const TICKS_PER_SPP: i64 = 6;

const BEATS_PER_BAR: i64 = 4;

const DEFAULT_BPM: f64 = 120.0;

pub struct MidiClockMaster {
    name: String,
    shared: Arc<ClockShared>,
    sample_clock_synced: bool,
    current_delta: i64,
}

struct ClockShared {
    snapshot: Arc<SnapshotCell>,
    state: Mutex<ClockState>,
    reset_pending: AtomicFlag,
    reset_keep_position: AtomicFlag,
    connected: AtomicFlag,
    locked: AtomicFlag,
    /// Tick period in samples, rounded
    tick_period: AtomicI64,
}

#[derive(Debug)]
struct ClockState {
    sample_rate: f64,
    tempo_bpm: f64,
    samples_per_tick: f64,
    ticks: i64,
    rolling: bool,
    /// Next tick is the first after Start/Continue
    awaiting_first: bool,
    ticks_since_start: u32,
    position_known: bool,
    last_tick: Option<i64>,
    speed: f64,
    dll: Dll,
}

fn samples_per_tick(sample_rate: f64, bpm: f64) -> f64 {
    60.0 * sample_rate / (bpm * CLOCK_PPQN as f64)
}

impl ClockState {
    fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            tempo_bpm: DEFAULT_BPM,
            samples_per_tick: samples_per_tick(sample_rate, DEFAULT_BPM),
            ticks: 0,
            rolling: false,
            awaiting_first: false,
            ticks_since_start: 0,
            position_known: false,
            last_tick: None,
            speed: 0.0,
            dll: Dll::new(),
        }
    }

    fn position(&self) -> i64 {
        (self.ticks as f64 * self.samples_per_tick).round() as i64
    }

    fn locked(&self) -> bool {
        if self.rolling {
            self.ticks_since_start >= LOCK_TICKS
        } else {
            self.position_known
        }
    }

    fn publish(&self, snapshot: &SnapshotCell, at: i64) {
        snapshot.update(self.position(), at, self.speed);
    }

    fn start_rolling(&mut self) {
        self.rolling = true;
        self.awaiting_first = true;
        self.ticks_since_start = 0;
        self.position_known = true;
        self.dll.reset();
    }

    fn stop(&mut self, snapshot: &SnapshotCell, at: i64) {
        self.rolling = false;
        self.awaiting_first = false;
        self.speed = 0.0;
        self.dll.reset();
        self.publish(snapshot, at);
    }

    fn tick(&mut self, snapshot: &SnapshotCell, at: i64) {
        if !self.rolling {
            return;
        }
        self.last_tick = Some(at);

        if self.awaiting_first {
            self.awaiting_first = false;
            self.dll
                .init(1.0, at as f64, self.samples_per_tick, self.sample_rate);
            self.speed = 1.0;
        } else {
            self.ticks += 1;
            if !self.dll.is_initialized() {
                self.dll
                    .init(self.speed.max(0.1), at as f64, self.samples_per_tick, self.sample_rate);
            } else {
                let error = at as f64 - self.dll.predicted();
                match self.dll.step(error) {
                    Some(est) => self.speed = 1.0 / est.speed,
                    None => {
                        warn!("MIDI clock DLL diverged, reinitializing");
                        self.dll
                            .init(1.0, at as f64, self.samples_per_tick, self.sample_rate);
                        self.speed = 1.0;
                    }
                }
            }
        }
        self.ticks_since_start = self.ticks_since_start.saturating_add(1);
        self.publish(snapshot, at);
    }

    fn set_tempo(&mut self, bpm: f64) {
        if bpm <= 0.0 || bpm == self.tempo_bpm {
            return;
        }
        debug!("MIDI clock tempo {} -> {} bpm", self.tempo_bpm, bpm);
        self.tempo_bpm = bpm;
        self.samples_per_tick = samples_per_tick(self.sample_rate, bpm);
        // Coefficients depend on the tick period; reseed on the next tick
        self.dll.reset();
    }
}

impl ClockShared {
    fn publish_period(&self, state: &ClockState) {
        self.tick_period
            .store(state.samples_per_tick.round() as i64, Ordering::Relaxed);
    }

    fn handle_locked(&self, state: &mut ClockState, message: &SyncMessage, timestamp: i64) {
        match *message {
            SyncMessage::Clock => state.tick(&self.snapshot, timestamp),
            SyncMessage::Start => {
                info!("MIDI clock start");
                state.ticks = 0;
                state.start_rolling();
                state.publish(&self.snapshot, timestamp);
            }
            SyncMessage::Continue => {
                info!("MIDI clock continue");
                state.start_rolling();
            }
            SyncMessage::Stop => {
                info!("MIDI clock stop");
                state.stop(&self.snapshot, timestamp);
            }
            SyncMessage::SongPosition(beats) => {
                if state.rolling {
                    debug!("ignoring song position while rolling");
                    return;
                }
                state.ticks = beats as i64 * TICKS_PER_SPP;
                state.position_known = true;
                state.publish(&self.snapshot, timestamp);
            }
            SyncMessage::QuarterFrame(_) | SyncMessage::FullFrame(_) => return,
        }
        self.locked.set(state.locked());
    }
}

impl MidiSyncSink for ClockShared {
    fn handle(&self, message: &SyncMessage, timestamp: i64) {
        if self.reset_pending.get() {
            return;
        }
        let mut state = self.state.lock();
        self.handle_locked(&mut state, message, timestamp);
    }

    fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }
}

impl MidiClockMaster {
    pub fn new(name: &str, sample_rate: f64) -> Self {
        let state = ClockState::new(sample_rate);
        let tick_period = AtomicI64::new(state.samples_per_tick.round() as i64);
        Self {
            name: name.to_string(),
            shared: Arc::new(ClockShared {
                snapshot: Arc::new(SnapshotCell::new()),
                state: Mutex::new(state),
                reset_pending: AtomicFlag::new(false),
                reset_keep_position: AtomicFlag::new(false),
                connected: AtomicFlag::new(true),
                locked: AtomicFlag::new(false),
                tick_period,
            }),
            sample_clock_synced: false,
            current_delta: 0,
        }
    }

    /// Source tempo derived from the measured tick rate.
    pub fn measured_bpm(&self) -> f64 {
        let state = self.shared.state.lock();
        state.tempo_bpm * state.speed
    }
}

impl TransportMaster for MidiClockMaster {
    fn kind(&self) -> SyncSource {
        SyncSource::MidiClock
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pre_process(&mut self, cycle: &CycleContext) {
        // The MIDI thread owns the state; skip bookkeeping this cycle if it is busy
        let Some(mut state) = self.shared.state.try_lock() else {
            return;
        };

        if self.shared.reset_pending.get() {
            let known = state.position_known;
            let ticks = state.ticks;
            *state = ClockState::new(cycle.sample_rate);
            if self.shared.reset_keep_position.get() {
                state.ticks = ticks;
                state.position_known = known;
                state.publish(&self.shared.snapshot, cycle.now);
            } else {
                self.shared.snapshot.clear();
            }
            self.shared.reset_pending.set(false);
        }

        state.sample_rate = cycle.sample_rate;
        state.set_tempo(cycle.tempo_bpm);
        self.shared.publish_period(&state);

        // Source vanished without sending Stop
        if let Some(last) = state.last_tick {
            if state.rolling && (cycle.now - last) as f64 > cycle.sample_rate / 4.0 {
                info!("MIDI clock ticks stopped arriving");
                state.stop(&self.shared.snapshot, last);
            }
        }
        self.shared.locked.set(state.locked());
        drop(state);

        if let (Some(session), Some(pos)) = (
            cycle.session_position,
            position_from(&self.shared.snapshot, cycle.now),
        ) {
            self.current_delta = pos.position - session;
        }
    }

    fn speed_and_position(&self, now: i64) -> Option<MasterPosition> {
        position_from(&self.shared.snapshot, now)
    }

    fn reset(&mut self, with_position: bool) {
        self.shared.reset_keep_position.set(with_position);
        self.shared.reset_pending.set(true);
        self.shared.locked.set(false);
        self.current_delta = 0;
    }

    fn locked(&self) -> bool {
        self.shared.locked.get()
    }

    fn ok(&self) -> bool {
        self.shared.connected.get()
    }

    fn resolution(&self) -> i64 {
        self.update_interval()
    }

    fn update_interval(&self) -> i64 {
        self.shared.tick_period.load(Ordering::Relaxed).max(1)
    }

    fn sample_clock_synced(&self) -> bool {
        self.sample_clock_synced
    }

    fn set_sample_clock_synced(&mut self, synced: bool) {
        self.sample_clock_synced = synced;
    }

    fn position_string(&self) -> String {
        let ticks = self.shared.state.lock().ticks;
        let ppqn = CLOCK_PPQN as i64;
        let beats = ticks.div_euclid(ppqn);
        format!(
            "{:03}|{}|{:02}",
            beats.div_euclid(BEATS_PER_BAR) + 1,
            beats.rem_euclid(BEATS_PER_BAR) + 1,
            ticks.rem_euclid(ppqn)
        )
    }

    fn delta_string(&self) -> String {
        format_delta(self.locked(), self.current_delta)
    }

    fn current_delta(&self) -> i64 {
        self.current_delta
    }

    fn snapshot(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.shared.snapshot)
    }

    fn midi_sink(&self) -> Option<Arc<dyn MidiSyncSink>> {
        Some(self.shared.clone() as Arc<dyn MidiSyncSink>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timecode::SmpteFrameRate;
    use approx::assert_abs_diff_eq;

    const SR: f64 = 48_000.0;

    fn cycle(now: i64) -> CycleContext {
        CycleContext {
            block_size: 512,
            now,
            session_position: Some(0),
            sample_rate: SR,
            tempo_bpm: 120.0,
            timecode_format: SmpteFrameRate::Fps25,
        }
    }

    /// Send Start then `count` ticks spaced `period` samples apart.
    fn run(sink: &dyn MidiSyncSink, count: usize, period: f64) -> i64 {
        sink.handle(&SyncMessage::Start, 0);
        let mut last = 0;
        for k in 0..count {
            last = (k as f64 * period).round() as i64;
            sink.handle(&SyncMessage::Clock, last);
        }
        last
    }

    #[test]
    fn test_locks_on_steady_clock() {
        let mut master = MidiClockMaster::new("Clock", SR);
        master.pre_process(&cycle(0));
        let sink = master.midi_sink().unwrap();

        sink.handle(&SyncMessage::Start, 0);
        sink.handle(&SyncMessage::Clock, 0);
        sink.handle(&SyncMessage::Clock, 1000);
        master.pre_process(&cycle(1000));
        assert!(!master.locked());

        let last = run(sink.as_ref(), 48, 1000.0);
        master.pre_process(&cycle(last));
        assert!(master.locked());

        let pos = master.speed_and_position(last).unwrap();
        assert_eq!(pos.speed, 1.0);
        assert_eq!(pos.position, 47 * 1000);
        assert_eq!(master.update_interval(), 1000);
        assert_eq!(master.position_string(), "001|2|23");
    }

    #[test]
    fn test_faster_source_raises_speed() {
        let mut master = MidiClockMaster::new("Clock", SR);
        master.pre_process(&cycle(0));
        let sink = master.midi_sink().unwrap();

        // 132 bpm against a 120 bpm session
        let period = samples_per_tick(SR, 132.0);
        run(sink.as_ref(), 2000, period);

        let pos = master.speed_and_position(0).unwrap();
        assert_abs_diff_eq!(pos.speed, 1.1, epsilon = 0.005);
        assert_abs_diff_eq!(master.measured_bpm(), 132.0, epsilon = 0.6);
    }

    #[test]
    fn test_stop_holds_position() {
        let mut master = MidiClockMaster::new("Clock", SR);
        let sink = master.midi_sink().unwrap();
        let last = run(sink.as_ref(), 25, 1000.0);
        sink.handle(&SyncMessage::Stop, last + 500);
        master.pre_process(&cycle(last + 512));

        assert!(master.locked());
        let pos = master.speed_and_position(last + 10_000).unwrap();
        assert_eq!(pos.speed, 0.0);
        assert_eq!(pos.position, 24_000);
    }

    #[test]
    fn test_song_position_only_while_stopped() {
        let mut master = MidiClockMaster::new("Clock", SR);
        let sink = master.midi_sink().unwrap();

        sink.handle(&SyncMessage::SongPosition(16), 0);
        master.pre_process(&cycle(0));
        assert!(master.locked());
        // 16 sixteenths = one 4/4 bar
        assert_eq!(master.speed_and_position(0).unwrap().position, 96 * 1000);
        assert_eq!(master.position_string(), "002|1|00");

        sink.handle(&SyncMessage::Continue, 10);
        sink.handle(&SyncMessage::Clock, 20);
        sink.handle(&SyncMessage::SongPosition(0), 30);
        assert_eq!(master.speed_and_position(20).unwrap().position, 96 * 1000);
    }

    #[test]
    fn test_session_tempo_rescales_ticks() {
        let mut master = MidiClockMaster::new("Clock", SR);
        let mut slow = cycle(0);
        slow.tempo_bpm = 60.0;
        master.pre_process(&slow);
        assert_eq!(master.update_interval(), 2000);
        assert_eq!(master.resolution(), 2000);
    }

    #[test]
    fn test_silent_source_stops() {
        let mut master = MidiClockMaster::new("Clock", SR);
        let sink = master.midi_sink().unwrap();
        let last = run(sink.as_ref(), 10, 1000.0);
        master.pre_process(&cycle(last + 100));
        assert_eq!(master.speed_and_position(last + 100).unwrap().speed, 1.0);

        master.pre_process(&cycle(last + 24_000));
        let pos = master.speed_and_position(last + 24_000).unwrap();
        assert_eq!(pos.speed, 0.0);
        assert_eq!(pos.position, 9000);
    }

    #[test]
    fn test_reset_is_applied_on_next_cycle() {
        let mut master = MidiClockMaster::new("Clock", SR);
        let sink = master.midi_sink().unwrap();
        run(sink.as_ref(), 10, 1000.0);
        master.pre_process(&cycle(9000));
        assert!(master.locked());

        master.reset(true);
        assert!(!master.locked());
        // Ignored until the audio thread applies the reset
        sink.handle(&SyncMessage::Start, 9500);
        master.pre_process(&cycle(9512));
        assert!(master.locked());
        assert_eq!(master.speed_and_position(9512).unwrap().speed, 0.0);

        sink.handle(&SyncMessage::Start, 10_000);
        assert_eq!(master.speed_and_position(10_000).unwrap().position, 0);
    }

    #[test]
    fn test_reset_without_position_clears_on_next_cycle() {
        let mut master = MidiClockMaster::new("Clock", SR);
        let sink = master.midi_sink().unwrap();
        run(sink.as_ref(), 10, 1000.0);
        master.pre_process(&cycle(9000));

        master.reset(false);
        // Only the audio thread writes the snapshot after a reset
        assert_eq!(master.speed_and_position(9000).unwrap().position, 9000);

        master.pre_process(&cycle(9512));
        let pos = master.speed_and_position(9512).unwrap();
        assert_eq!(pos.position, 0);
        assert_eq!(pos.speed, 0.0);
        assert!(!master.locked());
    }

    #[test]
    fn test_resolution_does_not_wait_for_midi_thread() {
        let master = MidiClockMaster::new("Clock", SR);
        let shared = Arc::clone(&master.shared);
        let (tx, rx) = crossbeam_channel::bounded(1);

        std::thread::scope(|s| {
            // Stands in for the MIDI thread mid-message
            let guard = shared.state.lock();
            s.spawn(|| {
                let _ = tx.send((master.resolution(), master.update_interval()));
            });
            let result = rx.recv_timeout(std::time::Duration::from_secs(1));
            drop(guard);
            assert_eq!(result, Ok((1000, 1000)));
        });
    }

    #[test]
    fn test_disconnect_is_not_ok() {
        let master = MidiClockMaster::new("Clock", SR);
        assert!(master.ok());
        master.midi_sink().unwrap().set_connected(false);
        assert!(!master.ok());
        assert_eq!(master.delta_string(), "--");
    }
}
