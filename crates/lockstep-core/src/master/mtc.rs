//! MIDI time code master.
//!
//! Quarter frames arrive on the MIDI input thread, which owns the decoder
//! through a mutex. The audio thread only ever `try_lock`s it: for deferred
//! resets, idle detection and to collect locate requests. If the MIDI thread
//! holds the lock, that work waits for the next cycle.

use super::{
    format_delta, position_from, CycleContext, LocateRequest, MasterPosition, MidiSyncSink,
    SyncSource, TransportMaster, UNLOCKED_TIMECODE,
};
use crate::dll::Dll;
use crate::lockfree::AtomicFlag;
use crate::manager::RollDisposition;
use crate::snapshot::SnapshotCell;
use crate::timecode::{SmpteFrameRate, Timecode};
use lockstep_midi::{FullFrame, MtcRate, QuarterFrame, SyncMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Window tolerance either side of the expected position, in frames.
const WINDOW_FRAMES: f64 = 4.0;

/// Quarter frames of lead time wanted before first lock (two full cycles).
const SEEKAHEAD_QUARTER_FRAMES: f64 = 16.0;

/// Silence longer than this many frames means the sender stopped.
const STOP_AFTER_FRAMES: f64 = 4.0;

pub struct MtcMaster {
    name: String,
    sample_rate: f64,
    shared: Arc<MtcShared>,
    sample_clock_synced: bool,
    current_delta: i64,
    locate_request: Option<LocateRequest>,
}

struct MtcShared {
    snapshot: Arc<SnapshotCell>,
    decoder: Mutex<MtcDecoder>,
    /// Resets requested off the decoder thread, performed by the audio thread
    reset_pending: AtomicU32,
    reset_keep_position: AtomicFlag,
    connected: AtomicFlag,
    locked: AtomicFlag,
    /// Index into `SmpteFrameRate::ALL`
    rate: AtomicU8,
    /// Quarter-frame duration in samples, rounded
    quarter_frame: AtomicI64,
}

#[derive(Debug)]
struct MtcDecoder {
    sample_rate: f64,
    fallback_rate: SmpteFrameRate,
    rate: SmpteFrameRate,
    rate_warned: bool,

    pieces: [u8; 8],
    last_piece: Option<u8>,
    /// Consecutive in-sequence quarter frames in `direction`
    run: u32,
    direction: i8,

    dll: Dll,
    have_lock: bool,
    /// Stopped by a full frame rather than by silence
    parked: bool,
    position: f64,
    speed: f64,
    window: Option<(i64, i64)>,
    last_message: i64,

    pending_locate: Option<LocateRequest>,
}

impl MtcDecoder {
    fn new(sample_rate: f64, fallback_rate: SmpteFrameRate) -> Self {
        Self {
            sample_rate,
            fallback_rate,
            rate: fallback_rate,
            rate_warned: false,
            pieces: [0; 8],
            last_piece: None,
            run: 0,
            direction: 0,
            dll: Dll::new(),
            have_lock: false,
            parked: false,
            position: 0.0,
            speed: 0.0,
            window: None,
            last_message: 0,
            pending_locate: None,
        }
    }

    fn quarter_frame(&self) -> f64 {
        self.rate.samples_per_frame(self.sample_rate) / 4.0
    }

    fn frame(&self) -> f64 {
        self.rate.samples_per_frame(self.sample_rate)
    }

    fn reset(&mut self, keep_position: bool) {
        let position = self.position;
        let rate = self.rate;
        *self = Self::new(self.sample_rate, self.fallback_rate);
        if keep_position {
            self.position = position;
            self.rate = rate;
        }
    }

    fn reset_window(&mut self, root: i64) {
        let qtr = self.quarter_frame().round() as i64;
        let span = (self.frame() * WINDOW_FRAMES).round() as i64;
        self.window = Some(if self.direction < 0 {
            ((root - span).max(0), root + qtr)
        } else {
            (root - qtr, root + span)
        });
    }

    fn outside_window(&self, position: i64) -> bool {
        self.window
            .is_some_and(|(begin, end)| position < begin || position > end)
    }

    /// Decode the rate bits of piece 7 (3 bits including the reserved one).
    fn apply_rate_code(&mut self, code: u8) {
        match MtcRate::from_code(code) {
            Some(rate) => {
                let rate = SmpteFrameRate::from_mtc(rate);
                // 23.976 material arrives as 24; keep the configured pull-down
                self.rate = if rate == SmpteFrameRate::Fps24
                    && self.fallback_rate == SmpteFrameRate::Fps23976
                {
                    SmpteFrameRate::Fps23976
                } else {
                    rate
                };
            }
            None => {
                if !self.rate_warned {
                    warn!(
                        "Unrecognized MTC rate code {}, using session format {}",
                        code, self.fallback_rate
                    );
                    self.rate_warned = true;
                }
                self.rate = self.fallback_rate;
            }
        }
    }

    /// Full reset because the source jumped somewhere we did not expect.
    fn force_relocate(&mut self, target: i64, now: i64, snapshot: &SnapshotCell) {
        warn!(
            "MTC position {} outside window {:?}, forcing locate",
            target, self.window
        );
        self.reset(false);
        self.pending_locate = Some(LocateRequest {
            target,
            roll: RollDisposition::MustStop,
        });
        self.position = target as f64;
        self.last_message = now;
        snapshot.update(target, now, 0.0);
    }

    fn handle_quarter_frame(&mut self, qf: QuarterFrame, now: i64, snapshot: &SnapshotCell) {
        let piece = qf.piece();
        let step = match self.last_piece {
            Some(last) if piece == (last + 1) % 8 => 1,
            Some(last) if piece == (last + 7) % 8 => -1,
            Some(_) => 0,
            None => self.direction.max(1),
        };
        self.last_piece = Some(piece);
        self.last_message = now;

        if step == 0 {
            debug!("MTC quarter frame {} out of sequence", piece);
            self.run = 1;
            self.dll.reset();
            self.speed = 0.0;
            self.pieces[piece as usize] = qf.value();
            return;
        }
        if step != self.direction {
            self.direction = step;
            self.run = 0;
            self.dll.reset();
        }
        self.run += 1;
        self.pieces[piece as usize] = qf.value();
        self.parked = false;

        let qtr = self.quarter_frame();
        if self.dll.is_initialized() {
            self.position += self.direction as f64 * qtr;
            let error = now as f64 - self.dll.predicted();
            match self.dll.step(error) {
                Some(est) => {
                    self.speed = self.direction as f64 / est.speed;
                }
                None => {
                    warn!("MTC DLL diverged, waiting for a fresh frame");
                    self.speed = 0.0;
                    self.run = 0;
                }
            }
        }

        let completes = (self.direction > 0 && piece == 7) || (self.direction < 0 && piece == 0);
        if completes && self.run >= 8 {
            self.apply_rate_code(self.pieces[7] >> 1);
            let tc = Timecode {
                frames: self.pieces[0] | ((self.pieces[1] & 0x01) << 4),
                seconds: self.pieces[2] | ((self.pieces[3] & 0x03) << 4),
                minutes: self.pieces[4] | ((self.pieces[5] & 0x03) << 4),
                hours: self.pieces[6] | ((self.pieces[7] & 0x01) << 4),
            };
            let qtr = self.quarter_frame();
            let fresh = tc.to_samples(self.rate, self.sample_rate)
                + (self.direction as f64 * 7.0 * qtr).round() as i64;

            if self.have_lock && self.outside_window(fresh) {
                self.force_relocate(fresh, now, snapshot);
                return;
            }

            self.position = fresh as f64;
            if !self.dll.is_initialized() {
                self.dll.init(1.0, now as f64, qtr, self.sample_rate);
                self.speed = self.direction as f64;
                if !self.have_lock {
                    info!("MTC locked at {}", tc.display(self.rate));
                }
                self.have_lock = true;
            }
            self.reset_window(fresh);
        }

        if self.have_lock {
            snapshot.update(self.position.round() as i64, now, self.speed);
        }
    }

    fn handle_full_frame(&mut self, frame: FullFrame, now: i64, snapshot: &SnapshotCell) {
        self.last_message = now;
        self.rate = SmpteFrameRate::from_mtc(frame.rate);
        let tc = Timecode::new(frame.hours, frame.minutes, frame.seconds, frame.frames);
        let position = tc.to_samples(self.rate, self.sample_rate);

        if self.have_lock && self.outside_window(position) {
            self.force_relocate(position, now, snapshot);
            return;
        }

        debug!("MTC full frame {}", tc.display(self.rate));
        self.dll.reset();
        self.run = 0;
        self.last_piece = None;
        self.position = position as f64;
        self.speed = 0.0;
        self.have_lock = true;
        self.parked = true;
        self.reset_window(position);
        snapshot.update(position, now, 0.0);
    }
}

impl MtcShared {
    fn publish_state(&self, decoder: &MtcDecoder) {
        self.locked.set(decoder.have_lock);
        let index = SmpteFrameRate::ALL
            .iter()
            .position(|r| *r == decoder.rate)
            .unwrap_or(0);
        self.rate.store(index as u8, Ordering::Relaxed);
        self.quarter_frame
            .store(decoder.quarter_frame().round() as i64, Ordering::Relaxed);
    }
}

impl MidiSyncSink for MtcShared {
    fn handle(&self, message: &SyncMessage, timestamp: i64) {
        if self.reset_pending.load(Ordering::Acquire) > 0 {
            // The audio thread has not caught up with a reset yet
            return;
        }
        let mut decoder = self.decoder.lock();
        match *message {
            SyncMessage::QuarterFrame(qf) => {
                decoder.handle_quarter_frame(qf, timestamp, &self.snapshot)
            }
            SyncMessage::FullFrame(frame) => {
                decoder.handle_full_frame(frame, timestamp, &self.snapshot)
            }
            _ => return,
        }
        self.publish_state(&decoder);
    }

    fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }
}

impl MtcMaster {
    pub fn new(name: &str, sample_rate: f64, fallback_rate: SmpteFrameRate) -> Self {
        let decoder = MtcDecoder::new(sample_rate, fallback_rate);
        let shared = MtcShared {
            snapshot: Arc::new(SnapshotCell::new()),
            reset_pending: AtomicU32::new(0),
            reset_keep_position: AtomicFlag::new(false),
            connected: AtomicFlag::new(true),
            locked: AtomicFlag::new(false),
            rate: AtomicU8::new(0),
            quarter_frame: AtomicI64::new(0),
            decoder: Mutex::new(decoder),
        };
        shared.publish_state(&shared.decoder.lock());

        Self {
            name: name.to_string(),
            sample_rate,
            shared: Arc::new(shared),
            sample_clock_synced: false,
            current_delta: 0,
            locate_request: None,
        }
    }

    /// Frame rate last announced by the source.
    pub fn apparent_format(&self) -> SmpteFrameRate {
        SmpteFrameRate::ALL[self.shared.rate.load(Ordering::Relaxed) as usize]
    }

    fn quarter_frame(&self) -> i64 {
        self.shared.quarter_frame.load(Ordering::Relaxed).max(1)
    }
}

impl TransportMaster for MtcMaster {
    fn kind(&self) -> SyncSource {
        SyncSource::Mtc
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pre_process(&mut self, cycle: &CycleContext) {
        let Some(mut decoder) = self.shared.decoder.try_lock() else {
            return;
        };

        if self.shared.reset_pending.load(Ordering::Acquire) > 0 {
            decoder.reset(self.shared.reset_keep_position.get());
            self.shared.snapshot.update(
                decoder.position.round() as i64,
                cycle.now,
                0.0,
            );
            self.shared.reset_pending.store(0, Ordering::Release);
        }

        decoder.fallback_rate = cycle.timecode_format;
        decoder.sample_rate = cycle.sample_rate;
        self.sample_rate = cycle.sample_rate;

        if let Some(request) = decoder.pending_locate.take() {
            self.locate_request = Some(request);
        }

        if decoder.have_lock {
            let idle = (cycle.now - decoder.last_message) as f64;
            if decoder.speed != 0.0 && idle > STOP_AFTER_FRAMES * decoder.frame() {
                debug!("MTC idle for {} samples, treating source as stopped", idle);
                let stopped_at = self.shared.snapshot.read().position_at(decoder.last_message);
                decoder.position = stopped_at as f64;
                decoder.speed = 0.0;
                decoder.dll.reset();
                decoder.run = 0;
                self.shared.snapshot.update(stopped_at, cycle.now, 0.0);
            }
            if !decoder.parked && idle > decoder.sample_rate {
                info!("MTC signal lost");
                decoder.have_lock = false;
                decoder.window = None;
            }
        }
        self.shared.publish_state(&decoder);
        drop(decoder);

        if let (Some(session), Some(pos)) =
            (cycle.session_position, position_from(&self.shared.snapshot, cycle.now))
        {
            self.current_delta = pos.position - session;
        }
    }

    fn speed_and_position(&self, now: i64) -> Option<MasterPosition> {
        position_from(&self.shared.snapshot, now)
    }

    fn reset(&mut self, with_position: bool) {
        self.shared.reset_keep_position.set(with_position);
        self.shared.reset_pending.fetch_add(1, Ordering::AcqRel);
        self.shared.locked.set(false);
        self.current_delta = 0;
        self.locate_request = None;
    }

    fn locked(&self) -> bool {
        self.shared.locked.get()
    }

    fn ok(&self) -> bool {
        self.shared.connected.get()
    }

    fn resolution(&self) -> i64 {
        self.quarter_frame()
    }

    fn update_interval(&self) -> i64 {
        self.quarter_frame()
    }

    fn requires_seekahead(&self) -> bool {
        true
    }

    fn seekahead_distance(&self) -> i64 {
        (self.quarter_frame() as f64 * SEEKAHEAD_QUARTER_FRAMES) as i64
    }

    fn sample_clock_synced(&self) -> bool {
        self.sample_clock_synced
    }

    fn set_sample_clock_synced(&mut self, synced: bool) {
        self.sample_clock_synced = synced;
    }

    fn position_string(&self) -> String {
        if !self.locked() {
            return UNLOCKED_TIMECODE.to_string();
        }
        let rate = self.apparent_format();
        let position = self.shared.snapshot.read().position;
        Timecode::from_samples(position, rate, self.sample_rate).display(rate)
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

    fn take_locate_request(&mut self) -> Option<LocateRequest> {
        self.locate_request.take()
    }

    fn midi_sink(&self) -> Option<Arc<dyn MidiSyncSink>> {
        Some(self.shared.clone() as Arc<dyn MidiSyncSink>)
    }
}
