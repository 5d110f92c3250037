//! The realtime process cycle.
//!
//! [`Processor::process`] is what the audio callback calls once per period.
//! In order it:
//!
//! 1. takes the process lock with `try_lock`, or silences the cycle and
//!    counts an overrun
//! 2. publishes the sample clock and settles finished locates
//! 3. asks the manager for this cycle's decision (never blocks)
//! 4. applies the resampling ratio
//! 5. acts on the decision, handing locates to the butler
//! 6. advances the session position

use crate::butler::ButlerHandle;
use crate::session::{Session, TransportRequest};
use lockstep_core::{
    AudioBackend, CycleContext, CycleOutcome, RollDisposition, SampleClock, SmpteFrameRate,
    StrategyAction, TransportMasterManager,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Per-cycle counters.
#[derive(Default)]
pub struct ProcessStats {
    cycles: AtomicU64,
    /// The process lock was held elsewhere
    overruns: AtomicU64,
    /// The master registry was busy
    deferred: AtomicU64,
    /// The manager had no usable master
    invalid: AtomicU64,
    /// Output silenced while catching up with the master
    disk_blocked: AtomicU64,
}

impl ProcessStats {
    pub fn snapshot(&self) -> ProcessStatsSnapshot {
        ProcessStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            disk_blocked: self.disk_blocked.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStatsSnapshot {
    pub cycles: u64,
    pub overruns: u64,
    pub deferred: u64,
    pub invalid: u64,
    pub disk_blocked: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingLocate {
    seq: u64,
    target: i64,
    roll: RollDisposition,
    /// Issued by the chase policy rather than the host
    chase: bool,
    was_rolling: bool,
    queued: bool,
}

impl PendingLocate {
    /// Chase locates leave the transport stopped: the policy starts it once
    /// the master reaches the target.
    fn rolls_after(&self) -> bool {
        match self.roll {
            RollDisposition::MustStop => false,
            RollDisposition::MustRoll => !self.chase,
            RollDisposition::RollIfAppropriate => self.was_rolling && !self.chase,
        }
    }
}

/// Audio-thread half of the session. Owned by the realtime callback.
pub struct Processor {
    session: Arc<Session>,
    manager: Arc<TransportMasterManager>,
    backend: Arc<dyn AudioBackend>,
    clock: Arc<SampleClock>,
    butler: ButlerHandle,
    process_lock: Arc<Mutex<()>>,
    stats: Arc<ProcessStats>,
    pending: Option<PendingLocate>,
    next_seq: u64,
}

impl Processor {
    pub fn new(
        session: Arc<Session>,
        manager: Arc<TransportMasterManager>,
        backend: Arc<dyn AudioBackend>,
        clock: Arc<SampleClock>,
        butler: ButlerHandle,
        process_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            session,
            manager,
            backend,
            clock,
            butler,
            process_lock,
            stats: Arc::new(ProcessStats::default()),
            pending: None,
            next_seq: 0,
        }
    }

    pub fn stats(&self) -> Arc<ProcessStats> {
        Arc::clone(&self.stats)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run one cycle of `nframes`. `output` holds what the host rendered and
    /// is silenced whenever the session must not be heard.
    ///
    /// Returns `None` when the cycle was skipped because the process lock
    /// was held.
    pub fn process(&mut self, nframes: u32, output: &mut [f32]) -> Option<CycleOutcome> {
        let process_lock = Arc::clone(&self.process_lock);
        let Some(_guard) = process_lock.try_lock() else {
            output.fill(0.0);
            ProcessStats::bump(&self.stats.overruns);
            return None;
        };
        ProcessStats::bump(&self.stats.cycles);

        let now = self.backend.sample_time();
        self.clock.publish(now);
        self.settle_locate();
        self.take_requests();

        let snapshot = self.session.snapshot(self.backend.io_latency());
        let cycle = CycleContext {
            block_size: nframes,
            now,
            session_position: Some(snapshot.position),
            sample_rate: self.backend.sample_rate(),
            // Tempo and timecode format come from the manager's settings
            tempo_bpm: 120.0,
            timecode_format: SmpteFrameRate::default(),
        };
        let outcome = self
            .manager
            .pre_process_transport_masters(&cycle, &snapshot);
        if outcome.deferred {
            ProcessStats::bump(&self.stats.deferred);
        } else if !outcome.valid {
            ProcessStats::bump(&self.stats.invalid);
        }

        self.session.set_ratio(outcome.ratio);

        let moving = self.apply(&outcome);
        self.dispatch_locate();

        let recording = self.session.actively_recording();
        let blocked = outcome.block_disk_output && !recording;
        self.session.set_disk_blocked(blocked);
        if blocked {
            ProcessStats::bump(&self.stats.disk_blocked);
        }

        if moving {
            self.session
                .advance((outcome.ratio * f64::from(nframes)).round() as i64);
        }
        if !moving || blocked {
            output.fill(0.0);
        }

        Some(outcome)
    }

    /// Act on the manager's decision. Returns whether the transport moves
    /// this cycle.
    fn apply(&mut self, outcome: &CycleOutcome) -> bool {
        let decision = &outcome.decision;
        match decision.action {
            StrategyAction::Relax => {}
            StrategyAction::Wait | StrategyAction::NoRoll => return false,
            StrategyAction::Locate => {
                self.begin_locate(decision.target, decision.roll, true);
                return false;
            }
            StrategyAction::Start => {
                if let Some(position) = decision.start_seek() {
                    self.session.set_position(position);
                }
                self.session.set_rolling(true);
            }
            StrategyAction::Stop => {
                self.session.set_rolling(false);
                return false;
            }
        }
        self.session.rolling() && self.pending.is_none()
    }

    fn take_requests(&mut self) {
        while let Some(request) = self.session.take_request() {
            match request {
                TransportRequest::Locate { target, roll } => {
                    self.begin_locate(target, roll, false);
                }
                TransportRequest::Speed(speed) if speed == 0.0 => {
                    self.session.set_rolling(false);
                }
                TransportRequest::Speed(speed) => {
                    self.session.set_nominal_speed(speed);
                    self.session.set_rolling(true);
                }
            }
        }
    }

    /// A newer locate supersedes one still in flight; the older completion
    /// is ignored when it arrives.
    fn begin_locate(&mut self, target: i64, roll: RollDisposition, chase: bool) {
        self.next_seq += 1;
        let was_rolling = self
            .pending
            .map_or(self.session.rolling(), |p| p.was_rolling);
        self.pending = Some(PendingLocate {
            seq: self.next_seq,
            target,
            roll,
            chase,
            was_rolling,
            queued: false,
        });
        self.session.set_locate_pending(true);
    }

    /// Queue the pending locate if it has not made it to the butler yet.
    fn dispatch_locate(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            if !pending.queued {
                pending.queued = self.butler.request_locate(pending.seq, pending.target);
            }
        }
    }

    fn settle_locate(&mut self) {
        let Some(pending) = self.pending else {
            return;
        };
        if self.session.completed_locate() < pending.seq {
            return;
        }

        self.session.set_position(pending.target);
        self.session.set_rolling(pending.rolls_after());
        self.session.set_locate_pending(false);
        self.pending = None;
        self.butler.request_refill();
        debug!(
            target = pending.target,
            rolling = pending.rolls_after(),
            "locate complete"
        );
    }
}
