//! Test helpers and fixtures for lockstep integration tests
//!
//! A deterministic dummy backend, manual cycle control and a scripted tape
//! machine as the master.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `RATIO_EPSILON` (0.001): settled chase ratio
//! - `SAMPLE_EPSILON` (1): sample-exact positions
//! - `BLOCK_EPSILON` (512): positions known to within one cycle

#![allow(dead_code)]

pub mod tolerances;

use lockstep::core::{CycleContext, MasterPosition, SnapshotCell};
use lockstep::prelude::*;
use lockstep::{AudioBackend, CycleOutcome, DummyBackend, TransportMaster};
use parking_lot::Mutex;
use std::sync::Arc;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Standard block size for deterministic testing
pub const TEST_BLOCK_SIZE: u32 = 512;

#[derive(Debug)]
struct TapeState {
    position: f64,
    speed: f64,
    locate: Option<f64>,
    locked: bool,
    ok: bool,
}

/// Remote control for a [`TapeMachine`] already handed to the manager.
#[derive(Clone)]
pub struct TapeControl(Arc<Mutex<TapeState>>);

impl TapeControl {
    pub fn roll(&self, speed: f64) {
        self.0.lock().speed = speed;
    }

    pub fn stop(&self) {
        self.0.lock().speed = 0.0;
    }

    /// Jump; the tape reads `position` at the next cycle.
    pub fn locate(&self, position: i64) {
        self.0.lock().locate = Some(position as f64);
    }

    pub fn set_locked(&self, locked: bool) {
        self.0.lock().locked = locked;
    }

    pub fn set_ok(&self, ok: bool) {
        self.0.lock().ok = ok;
    }

    /// Position as of the last cycle the tape was processed in.
    pub fn position(&self) -> i64 {
        self.0.lock().position.round() as i64
    }

    /// Where the tape will be `frames` after the last processed cycle.
    pub fn projected(&self, frames: u32) -> i64 {
        let state = self.0.lock();
        (state.position + state.speed * f64::from(frames)).round() as i64
    }
}

/// A master that moves at a scripted speed on the audio clock.
pub struct TapeMachine {
    name: String,
    state: Arc<Mutex<TapeState>>,
    snapshot: Arc<SnapshotCell>,
    last_now: Option<i64>,
    delta: i64,
}

impl TapeMachine {
    pub fn new(name: &str, position: i64, speed: f64) -> (Self, TapeControl) {
        let state = Arc::new(Mutex::new(TapeState {
            position: position as f64,
            speed,
            locate: None,
            locked: true,
            ok: true,
        }));
        let tape = Self {
            name: name.to_string(),
            state: Arc::clone(&state),
            snapshot: Arc::new(SnapshotCell::new()),
            last_now: None,
            delta: 0,
        };
        (tape, TapeControl(state))
    }
}

impl TransportMaster for TapeMachine {
    fn kind(&self) -> SyncSource {
        SyncSource::Ltc
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pre_process(&mut self, cycle: &CycleContext) {
        let mut state = self.state.lock();
        if let Some(target) = state.locate.take() {
            state.position = target;
        } else if let Some(last) = self.last_now {
            state.position += state.speed * (cycle.now - last) as f64;
        }
        self.last_now = Some(cycle.now);

        let position = state.position.round() as i64;
        self.snapshot.update(position, cycle.now, state.speed);
        self.delta = cycle.session_position.map_or(0, |s| position - s);
    }

    fn speed_and_position(&self, now: i64) -> Option<MasterPosition> {
        self.last_now?;
        let snap = self.snapshot.read();
        Some(MasterPosition {
            speed: snap.speed,
            position: snap.position_at(now),
            last_position: snap.position,
            last_timestamp: snap.timestamp,
        })
    }

    fn reset(&mut self, _with_position: bool) {}

    fn locked(&self) -> bool {
        self.state.lock().locked
    }

    fn ok(&self) -> bool {
        self.state.lock().ok
    }

    fn resolution(&self) -> i64 {
        (TEST_SAMPLE_RATE / 1000.0) as i64
    }

    fn update_interval(&self) -> i64 {
        TEST_BLOCK_SIZE as i64
    }

    fn sample_clock_synced(&self) -> bool {
        false
    }

    fn position_string(&self) -> String {
        self.state.lock().position.round().to_string()
    }

    fn current_delta(&self) -> i64 {
        self.delta
    }

    fn snapshot(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshot)
    }
}

/// Engine plus manual cycle control.
pub struct Rig {
    pub engine: LockstepEngine,
    pub backend: Arc<DummyBackend>,
    pub processor: Processor,
    output: Vec<f32>,
}

impl Rig {
    pub fn new(builder: LockstepEngineBuilder, backend: DummyBackend) -> Self {
        let backend = Arc::new(backend);
        let engine = builder
            .backend(backend.clone())
            .build()
            .expect("Failed to create test engine");
        let processor = engine.take_processor().expect("processor already taken");
        Self {
            engine,
            backend,
            processor,
            output: vec![1.0; TEST_BLOCK_SIZE as usize],
        }
    }

    pub fn dummy() -> DummyBackend {
        DummyBackend::new(TEST_SAMPLE_RATE, TEST_BLOCK_SIZE)
    }

    /// A rig chasing a tape machine with external sync on.
    pub fn chasing(tape: TapeMachine, builder: LockstepEngineBuilder, backend: DummyBackend) -> Self {
        let rig = Self::new(builder, backend);
        let name = tape.name().to_string();
        let manager = rig.engine.manager();
        manager.add_master(Box::new(tape), true).unwrap();
        manager.set_current(Some(&name)).unwrap();
        manager.set_external_sync(true);
        rig
    }

    pub fn now(&self) -> i64 {
        self.backend.sample_time()
    }

    /// One cycle without waiting for the butler.
    pub fn process(&mut self) -> Option<CycleOutcome> {
        self.output.fill(1.0);
        let outcome = self.processor.process(TEST_BLOCK_SIZE, &mut self.output);
        self.backend.advance();
        outcome
    }

    /// One cycle, letting the butler settle anything it was handed.
    pub fn cycle(&mut self) -> Option<CycleOutcome> {
        self.output.fill(1.0);
        let outcome = self.processor.process(TEST_BLOCK_SIZE, &mut self.output);
        self.engine.flush_butler().unwrap();
        self.backend.advance();
        outcome
    }

    pub fn run(&mut self, cycles: usize) -> Vec<CycleOutcome> {
        (0..cycles).filter_map(|_| self.cycle()).collect()
    }

    /// Run until the session rolls, up to `max` cycles.
    pub fn run_until_rolling(&mut self, max: usize) -> bool {
        for _ in 0..max {
            self.cycle();
            if self.engine.session().rolling() {
                return true;
            }
        }
        false
    }

    pub fn output_silent(&self) -> bool {
        self.output.iter().all(|&s| s == 0.0)
    }
}
