//! Linear timecode master.
//!
//! Capture audio reaches the master through an SPSC ring: the host's input
//! callback pushes, and `pre_process` drains and decodes on the audio
//! thread. The frame rate is found by majority vote over a window of
//! frames; until the vote completes, each frame's own duration decides.

use super::{
    format_delta, position_from, CycleContext, MasterPosition, SyncSource, TransportMaster,
    UNLOCKED_TIMECODE,
};
use crate::dll::Dll;
use crate::ltc::{DecodedFrame, LtcDecoder};
use crate::snapshot::SnapshotCell;
use crate::timecode::{SmpteFrameRate, Timecode};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Frames per rate-detection vote.
pub const DETECT_WINDOW: u32 = 40;

/// Consecutive well-ordered frames required before reporting lock.
pub const LOCK_FRAMES: u32 = 10;

/// Ring capacity: one second at 192 kHz.
const INPUT_CAPACITY: usize = 192_000;

const SCRATCH_LEN: usize = 4096;

/// Producer side of an LTC master's capture ring.
pub struct LtcAudioInput {
    producer: HeapProd<f32>,
}

impl LtcAudioInput {
    /// Push capture samples. Returns how many fit.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }

    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }
}

pub struct LtcMaster {
    name: String,
    sample_rate: f64,
    // Only reached through `&mut self`; the mutexes are never locked
    consumer: Mutex<HeapCons<f32>>,
    producer: Mutex<Option<HeapProd<f32>>>,
    scratch: Vec<f32>,
    decoder: LtcDecoder,
    tracker: LtcTracker,
    snapshot: Arc<SnapshotCell>,
    xrun_pending: bool,
    sample_clock_synced: bool,
    current_delta: i64,
}

/// Lock and rate state fed by decoded frames.
#[derive(Debug)]
struct LtcTracker {
    sample_rate: f64,
    fallback: SmpteFrameRate,
    fallback_warned: bool,
    detected: Option<SmpteFrameRate>,
    provisional: Option<SmpteFrameRate>,
    /// Votes indexed like `SmpteFrameRate::ALL`
    votes: [u32; 5],
    voted: u32,

    previous: Option<(Timecode, i8)>,
    good_frames: u32,
    locked: bool,
    dll: Dll,
    dll_rate: Option<SmpteFrameRate>,
    speed: f64,
    last_frame_end: Option<i64>,
}

/// Classify one frame by its duration and drop-frame flag.
fn classify(duration: f64, drop_frame: bool, sample_rate: f64) -> SmpteFrameRate {
    let fps = sample_rate / duration;
    if fps < 24.5 {
        if fps < 23.988 {
            SmpteFrameRate::Fps23976
        } else {
            SmpteFrameRate::Fps24
        }
    } else if fps < 27.5 {
        SmpteFrameRate::Fps25
    } else if drop_frame {
        SmpteFrameRate::Fps2997Df
    } else {
        SmpteFrameRate::Fps30
    }
}

fn rate_index(rate: SmpteFrameRate) -> usize {
    SmpteFrameRate::ALL
        .iter()
        .position(|r| *r == rate)
        .unwrap_or(0)
}

impl LtcTracker {
    fn new(sample_rate: f64, fallback: SmpteFrameRate) -> Self {
        Self {
            sample_rate,
            fallback,
            fallback_warned: false,
            detected: None,
            provisional: None,
            votes: [0; 5],
            voted: 0,
            previous: None,
            good_frames: 0,
            locked: false,
            dll: Dll::new(),
            dll_rate: None,
            speed: 0.0,
            last_frame_end: None,
        }
    }

    fn rate(&self) -> SmpteFrameRate {
        self.detected.or(self.provisional).unwrap_or(self.fallback)
    }

    fn drop_lock(&mut self) {
        if self.locked {
            info!("LTC lock lost");
        }
        self.locked = false;
        self.good_frames = 0;
        self.dll.reset();
    }

    fn vote(&mut self, duration: f64, drop_frame: bool) {
        let class = classify(duration, drop_frame, self.sample_rate);
        self.provisional = Some(class);
        self.votes[rate_index(class)] += 1;
        self.voted += 1;
        if self.voted < DETECT_WINDOW {
            return;
        }

        let (best, count) = self
            .votes
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(i, count)| (SmpteFrameRate::ALL[i], *count))
            .unwrap_or((self.fallback, 0));
        let winner = if count * 2 > self.voted {
            best
        } else {
            if !self.fallback_warned {
                warn!(
                    "LTC frame rate ambiguous, using session format {}",
                    self.fallback
                );
                self.fallback_warned = true;
            }
            self.fallback
        };
        if self.detected != Some(winner) {
            debug!("LTC frame rate detected: {}", winner);
        }
        self.detected = Some(winner);
        self.votes = [0; 5];
        self.voted = 0;
    }

    fn on_frame(&mut self, decoded: DecodedFrame, snapshot: &SnapshotCell) {
        let direction: i8 = if decoded.reverse { -1 } else { 1 };
        let tc = decoded.frame.timecode();
        self.vote((decoded.end - decoded.start) as f64, decoded.frame.drop_frame());

        // Label arithmetic must not depend on a rate that is still being voted on
        let continuous = self.previous.is_some_and(|(prev, prev_dir)| {
            prev_dir == direction
                && SmpteFrameRate::ALL
                    .iter()
                    .any(|r| prev.offset(direction as i64, *r) == tc)
        });
        if self.previous.is_some() && !continuous {
            debug!("LTC discontinuity at {:?}", tc);
            self.drop_lock();
        }
        self.previous = Some((tc, direction));
        self.good_frames += 1;
        self.last_frame_end = Some(decoded.end);

        let rate = self.rate();
        if self.dll_rate != Some(rate) {
            self.dll.reset();
            self.dll_rate = Some(rate);
        }
        let period = rate.samples_per_frame(self.sample_rate);
        let arrival = decoded.start as f64;
        if self.dll.is_initialized() {
            let error = arrival - self.dll.predicted();
            match self.dll.step(error) {
                Some(est) => self.speed = direction as f64 / est.speed,
                None => {
                    warn!("LTC DLL diverged");
                    self.drop_lock();
                    self.speed = direction as f64;
                }
            }
        } else {
            self.dll.init(1.0, arrival, period, self.sample_rate);
            self.speed = direction as f64;
        }

        if !self.locked && self.good_frames >= LOCK_FRAMES {
            info!("LTC locked at {} ({})", tc.display(rate), rate);
            self.locked = true;
        }

        // A reversed frame's label is reached at the end of its audio
        let at = if direction > 0 {
            decoded.start
        } else {
            decoded.end
        };
        snapshot.update(tc.to_samples(rate, self.sample_rate), at, self.speed);
    }
}

impl LtcMaster {
    pub fn new(name: &str, sample_rate: f64, fallback: SmpteFrameRate) -> Self {
        let (producer, consumer) = HeapRb::<f32>::new(INPUT_CAPACITY).split();
        Self {
            name: name.to_string(),
            sample_rate,
            consumer: Mutex::new(consumer),
            producer: Mutex::new(Some(producer)),
            scratch: vec![0.0; SCRATCH_LEN],
            decoder: LtcDecoder::new(sample_rate),
            tracker: LtcTracker::new(sample_rate, fallback),
            snapshot: Arc::new(SnapshotCell::new()),
            xrun_pending: false,
            sample_clock_synced: false,
            current_delta: 0,
        }
    }

    /// Detected frame rate, or the best current guess.
    pub fn apparent_format(&self) -> SmpteFrameRate {
        self.tracker.rate()
    }

    fn resync(&mut self) {
        debug!("LTC resync after xrun");
        self.consumer.get_mut().clear();
        self.decoder.reset();
        self.tracker.drop_lock();
        self.tracker.previous = None;
        self.tracker.last_frame_end = None;
    }
}

impl TransportMaster for LtcMaster {
    fn kind(&self) -> SyncSource {
        SyncSource::Ltc
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pre_process(&mut self, cycle: &CycleContext) {
        if self.xrun_pending {
            self.xrun_pending = false;
            self.resync();
        }
        self.tracker.fallback = cycle.timecode_format;

        // Queued samples end where this cycle ends
        let cycle_end = cycle.now + cycle.block_size as i64;
        let consumer = self.consumer.get_mut();
        let mut t = cycle_end - consumer.occupied_len() as i64;
        loop {
            let n = consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            let tracker = &mut self.tracker;
            let snapshot = &self.snapshot;
            self.decoder
                .feed(&self.scratch[..n], t, |frame| tracker.on_frame(frame, snapshot));
            t += n as i64;
        }

        if let Some(last) = self.tracker.last_frame_end {
            if (cycle_end - last) as f64 > self.sample_rate {
                // Flywheel expired: keep the position where the signal ended
                info!("LTC signal lost");
                let held = self.snapshot.read().position_at(last);
                self.tracker.drop_lock();
                self.tracker.previous = None;
                self.tracker.last_frame_end = None;
                self.tracker.speed = 0.0;
                self.snapshot.update(held, cycle.now, 0.0);
            }
        }

        if let (Some(session), Some(pos)) =
            (cycle.session_position, position_from(&self.snapshot, cycle.now))
        {
            self.current_delta = pos.position - session;
        }
    }

    fn speed_and_position(&self, now: i64) -> Option<MasterPosition> {
        position_from(&self.snapshot, now)
    }

    fn reset(&mut self, with_position: bool) {
        self.decoder.reset();
        self.tracker.drop_lock();
        self.tracker.previous = None;
        self.tracker.last_frame_end = None;
        self.current_delta = 0;
        if !with_position {
            self.snapshot.clear();
        }
    }

    fn locked(&self) -> bool {
        self.tracker.locked
    }

    fn ok(&self) -> bool {
        true
    }

    fn resolution(&self) -> i64 {
        (self.sample_rate / 1000.0) as i64
    }

    fn update_interval(&self) -> i64 {
        self.apparent_format().samples_per_frame(self.sample_rate) as i64
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
        let position = self.snapshot.read().position;
        Timecode::from_samples(position, rate, self.sample_rate).display(rate)
    }

    fn delta_string(&self) -> String {
        format_delta(self.locked(), self.current_delta)
    }

    fn current_delta(&self) -> i64 {
        self.current_delta
    }

    fn snapshot(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshot)
    }

    fn take_audio_input(&mut self) -> Option<LtcAudioInput> {
        self.producer
            .get_mut()
            .take()
            .map(|producer| LtcAudioInput { producer })
    }

    fn resync_xrun(&mut self) {
        self.xrun_pending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltc::LtcEncoder;

    const SR: f64 = 48_000.0;
    const BLOCK: usize = 512;

    struct Rig {
        master: LtcMaster,
        input: LtcAudioInput,
        now: i64,
    }

    impl Rig {
        fn new(fallback: SmpteFrameRate) -> Self {
            let mut master = LtcMaster::new("LTC", SR, fallback);
            let input = master.take_audio_input().unwrap();
            Self {
                master,
                input,
                now: 0,
            }
        }

        fn cycle(&self, block_size: usize) -> CycleContext {
            CycleContext {
                block_size: block_size as u32,
                now: self.now,
                session_position: Some(0),
                sample_rate: SR,
                tempo_bpm: 120.0,
                timecode_format: self.master.tracker.fallback,
            }
        }

        /// Run one cycle per block of `audio`.
        fn play(&mut self, audio: &[f32]) {
            for block in audio.chunks(BLOCK) {
                self.input.push(block);
                let cycle = self.cycle(block.len());
                self.master.pre_process(&cycle);
                self.now += block.len() as i64;
            }
        }

        fn silence(&mut self, samples: usize) {
            self.play(&vec![0.0; samples]);
        }
    }

    #[test]
    fn test_detects_25fps_over_window() {
        let mut rig = Rig::new(SmpteFrameRate::Fps30);
        let mut enc = LtcEncoder::new(SmpteFrameRate::Fps25, SR);
        let mut audio = Vec::new();
        enc.encode_run(Timecode::new(1, 0, 0, 0), 45, &mut audio);
        rig.play(&audio);

        assert_eq!(rig.master.tracker.detected, Some(SmpteFrameRate::Fps25));
        assert_eq!(rig.master.apparent_format(), SmpteFrameRate::Fps25);
        assert!(rig.master.locked());

        let pos = rig.master.speed_and_position(rig.now).unwrap();
        assert_eq!(pos.speed, 1.0);
        // The tape started at 01:00:00:00 at sample time 0
        let expected = 3600 * 48_000 + rig.now;
        assert!((pos.position - expected).abs() <= 1, "{} vs {}", pos.position, expected);
    }

    #[test]
    fn test_dropped_frame_unlocks_then_relocks() {
        let mut rig = Rig::new(SmpteFrameRate::Fps25);
        let mut enc = LtcEncoder::new(SmpteFrameRate::Fps25, SR);
        let start = Timecode::new(0, 0, 0, 0);

        let mut first = Vec::new();
        enc.encode_run(start, 30, &mut first);
        // Frame 30 never arrives
        let mut second = Vec::new();
        enc.encode_run(start.offset(31, SmpteFrameRate::Fps25), 30, &mut second);

        rig.play(&first);
        assert!(rig.master.locked());

        // Up to just after the first frame following the gap
        rig.play(&second[..1920 + 2 * BLOCK]);
        assert!(!rig.master.locked());

        rig.play(&second[1920 + 2 * BLOCK..]);
        assert!(rig.master.locked());
    }

    #[test]
    fn test_flywheel_keeps_position() {
        let mut rig = Rig::new(SmpteFrameRate::Fps25);
        let mut enc = LtcEncoder::new(SmpteFrameRate::Fps25, SR);
        let mut audio = Vec::new();
        enc.encode_run(Timecode::new(0, 0, 10, 0), 20, &mut audio);
        rig.play(&audio);
        assert!(rig.master.locked());
        let before = rig.master.speed_and_position(rig.now).unwrap().position;

        // Half a second of silence: still flywheeling
        rig.silence(24_000);
        assert!(rig.master.locked());

        rig.silence(48_000);
        assert!(!rig.master.locked());
        let held = rig.master.speed_and_position(rig.now + 10_000).unwrap();
        assert_eq!(held.speed, 0.0);
        assert!((held.position - before).abs() <= 1920);
        assert_ne!(rig.master.position_string(), "");
    }

    #[test]
    fn test_xrun_resync_clears_lock() {
        let mut rig = Rig::new(SmpteFrameRate::Fps25);
        let mut enc = LtcEncoder::new(SmpteFrameRate::Fps25, SR);
        let mut audio = Vec::new();
        enc.encode_run(Timecode::new(0, 0, 0, 0), 60, &mut audio);

        rig.play(&audio[..20 * 1920]);
        assert!(rig.master.locked());

        rig.master.resync_xrun();
        rig.play(&audio[20 * 1920..22 * 1920]);
        assert!(!rig.master.locked());

        rig.play(&audio[22 * 1920..]);
        assert!(rig.master.locked());
        assert_eq!(rig.master.resolution(), 48);
    }

    #[test]
    fn test_classify_durations() {
        assert_eq!(classify(2002.0, false, SR), SmpteFrameRate::Fps23976);
        assert_eq!(classify(2000.0, false, SR), SmpteFrameRate::Fps24);
        assert_eq!(classify(1920.0, false, SR), SmpteFrameRate::Fps25);
        assert_eq!(classify(1601.6, true, SR), SmpteFrameRate::Fps2997Df);
        assert_eq!(classify(1600.0, false, SR), SmpteFrameRate::Fps30);
    }

    #[test]
    fn test_audio_input_taken_once() {
        let mut master = LtcMaster::new("LTC", SR, SmpteFrameRate::Fps25);
        assert!(master.take_audio_input().is_some());
        assert!(master.take_audio_input().is_none());
    }
}
