//! The chase policy: turn one master reading into one session decision.

use super::strategy::{
    CycleOutcome, RollDisposition, SessionSnapshot, StrategyAction, StrategyDecision,
};
use crate::config::SyncSettings;
use crate::dll::Dll;
use crate::master::{CycleContext, TransportMaster};
use tracing::{debug, info, warn};

/// Preroll doubles on each consecutive missed start, up to this many times.
const MAX_PREROLL_DOUBLINGS: u32 = 4;

/// Locate the policy is waiting on.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Outstanding {
    target: i64,
    roll: RollDisposition,
}

/// Chase state carried between cycles. Reset on every master switch.
#[derive(Debug, Default)]
pub struct ChaseState {
    dll: Dll,
    outstanding: Option<Outstanding>,
    missed_starts: u32,
    disk_blocked: bool,
}

impl ChaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.dll.reset();
        self.outstanding = None;
        self.missed_starts = 0;
        self.disk_blocked = false;
    }

    pub fn is_waiting(&self) -> bool {
        self.outstanding.is_some()
    }

    fn locate(&mut self, target: i64, roll: RollDisposition) -> CycleOutcome {
        self.dll.reset();
        self.outstanding = Some(Outstanding { target, roll });
        CycleOutcome::new(1.0, StrategyDecision::locate(target, roll), true)
    }

    fn set_disk_blocked(&mut self, blocked: bool, delta: i64) {
        if blocked != self.disk_blocked {
            if blocked {
                debug!("blocking disk output, delta {}", delta);
            } else {
                debug!("unblocking disk output");
            }
            self.disk_blocked = blocked;
        }
    }
}

fn direction(speed: f64) -> i64 {
    if speed < 0.0 {
        -1
    } else {
        1
    }
}

/// Decide what the session does this cycle, given an already pre-processed
/// current master.
pub fn chase(
    master: &mut dyn TransportMaster,
    cycle: &CycleContext,
    session: &SessionSnapshot,
    settings: &SyncSettings,
    state: &mut ChaseState,
) -> CycleOutcome {
    if !master.usable() {
        state.reset();
        return CycleOutcome::new(1.0, StrategyDecision::of(StrategyAction::NoRoll), false);
    }

    if !master.ok() {
        state.reset();
        return CycleOutcome::new(1.0, StrategyDecision::of(StrategyAction::Stop), false);
    }

    if let Some(request) = master.take_locate_request() {
        info!(
            "{} requested locate to {} ({:?})",
            master.name(),
            request.target,
            request.roll
        );
        let mut outcome = state.locate(request.target, request.roll);
        outcome.valid = false;
        return outcome;
    }

    if !master.locked() {
        state.dll.reset();
        state.outstanding = None;
        let decision = if session.rolling && settings.keep_rolling_on_sync_loss {
            StrategyDecision::relax(session.nominal_speed)
        } else if session.rolling {
            StrategyDecision::of(StrategyAction::Stop)
        } else {
            StrategyDecision::of(StrategyAction::NoRoll)
        };
        return CycleOutcome::new(1.0, decision, false);
    }

    let Some(mp) = master.speed_and_position(cycle.now) else {
        return CycleOutcome::new(1.0, StrategyDecision::of(StrategyAction::NoRoll), false);
    };

    if session.locate_pending {
        return CycleOutcome::new(1.0, StrategyDecision::of(StrategyAction::Wait), true);
    }

    let block = cycle.block_size as i64;
    let resolution = master.resolution().max(1);
    let threshold = (settings.locate_threshold_blocks as i64 * block).max(resolution);
    let delta = mp.position - session.position;
    let master_rolling = mp.speed != 0.0;
    let dir = direction(mp.speed);

    let base_preroll = (session.io_latency as i64 + block).max(master.seekahead_distance());
    let preroll = base_preroll << state.missed_starts.min(MAX_PREROLL_DOUBLINGS);

    if let Some(outstanding) = state.outstanding {
        if outstanding.roll == RollDisposition::MustRoll && master_rolling {
            // Master must come round to the target before we roll
            let remaining = (outstanding.target - mp.position) * dir;
            if remaining > session.io_latency as i64 {
                return CycleOutcome::new(
                    1.0,
                    StrategyDecision::of(StrategyAction::Wait),
                    true,
                );
            }
            state.outstanding = None;
            let offset = outstanding.target - mp.position;
            if offset.abs() <= threshold {
                state.missed_starts = 0;
                state.dll.reset();
                let seek = (offset != 0).then_some(mp.position);
                debug!("starting at {} (seek {:?})", mp.position, seek);
                return CycleOutcome::new(1.0, StrategyDecision::start(seek), true);
            }
            state.missed_starts += 1;
            warn!(
                "master passed locate target {} by {} samples, relocating",
                outstanding.target,
                -offset * dir
            );
            let preroll = base_preroll << state.missed_starts.min(MAX_PREROLL_DOUBLINGS);
            return state.locate(mp.position + dir * preroll, RollDisposition::MustRoll);
        }
        state.outstanding = None;
    }

    match (master_rolling, session.rolling) {
        (false, true) => {
            state.dll.reset();
            CycleOutcome::new(1.0, StrategyDecision::of(StrategyAction::Stop), true)
        }
        (false, false) => {
            if delta.abs() > resolution {
                state.locate(mp.position, RollDisposition::MustStop)
            } else {
                CycleOutcome::new(1.0, StrategyDecision::relax(0.0), true)
            }
        }
        (true, false) => {
            if delta.abs() > threshold || master.requires_seekahead() {
                state.locate(mp.position + dir * preroll, RollDisposition::MustRoll)
            } else {
                state.dll.reset();
                let seek = (delta != 0).then_some(mp.position);
                CycleOutcome::new(1.0, StrategyDecision::start(seek), true)
            }
        }
        (true, true) => {
            if delta.abs() > threshold {
                info!("delta {} beyond {} samples, relocating", delta, threshold);
                return state.locate(mp.position + dir * preroll, RollDisposition::MustRoll);
            }

            if master.sample_clock_synced() {
                state.set_disk_blocked(false, delta);
                let ratio = mp.speed.signum();
                return CycleOutcome::new(ratio, StrategyDecision::relax(ratio), true);
            }

            let ratio = if state.dll.is_initialized() {
                match state.dll.step(delta as f64) {
                    Some(est) => est.speed,
                    None => {
                        warn!("chase DLL diverged at delta {}, relocating", delta);
                        return state
                            .locate(mp.position + dir * preroll, RollDisposition::MustRoll);
                    }
                }
            } else {
                state.dll.init(
                    mp.speed,
                    session.position as f64,
                    block as f64,
                    cycle.sample_rate,
                );
                mp.speed
            };

            let blocked = delta.abs() > resolution && !session.actively_recording;
            state.set_disk_blocked(blocked, delta);
            let mut outcome = CycleOutcome::new(ratio, StrategyDecision::relax(ratio), true);
            outcome.block_disk_output = blocked;
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{LocateRequest, MasterPosition, SyncSource};
    use crate::snapshot::SnapshotCell;
    use crate::timecode::SmpteFrameRate;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    const BLOCK: u32 = 512;

    /// A master whose readings the test sets directly.
    struct Scripted {
        snapshot: Arc<SnapshotCell>,
        locked: bool,
        ok: bool,
        usable: bool,
        resolution: i64,
        synced: bool,
        seekahead: Option<i64>,
        request: Option<LocateRequest>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                snapshot: Arc::new(SnapshotCell::new()),
                locked: true,
                ok: true,
                usable: true,
                resolution: 480,
                synced: false,
                seekahead: None,
                request: None,
            }
        }

        fn at(self, position: i64, timestamp: i64, speed: f64) -> Self {
            self.snapshot.update(position, timestamp, speed);
            self
        }
    }

    impl TransportMaster for Scripted {
        fn kind(&self) -> SyncSource {
            SyncSource::Ltc
        }
        fn name(&self) -> &str {
            "scripted"
        }
        fn pre_process(&mut self, _cycle: &CycleContext) {}
        fn speed_and_position(&self, now: i64) -> Option<MasterPosition> {
            crate::master::position_from(&self.snapshot, now)
        }
        fn reset(&mut self, _with_position: bool) {}
        fn locked(&self) -> bool {
            self.locked
        }
        fn ok(&self) -> bool {
            self.ok
        }
        fn usable(&self) -> bool {
            self.usable
        }
        fn resolution(&self) -> i64 {
            self.resolution
        }
        fn update_interval(&self) -> i64 {
            BLOCK as i64
        }
        fn requires_seekahead(&self) -> bool {
            self.seekahead.is_some()
        }
        fn seekahead_distance(&self) -> i64 {
            self.seekahead.unwrap_or(0)
        }
        fn sample_clock_synced(&self) -> bool {
            self.synced
        }
        fn position_string(&self) -> String {
            String::new()
        }
        fn current_delta(&self) -> i64 {
            0
        }
        fn snapshot(&self) -> Arc<SnapshotCell> {
            Arc::clone(&self.snapshot)
        }
        fn take_locate_request(&mut self) -> Option<LocateRequest> {
            self.request.take()
        }
    }

    fn cycle(now: i64) -> CycleContext {
        CycleContext {
            block_size: BLOCK,
            now,
            session_position: None,
            sample_rate: 48_000.0,
            tempo_bpm: 120.0,
            timecode_format: SmpteFrameRate::Fps25,
        }
    }

    fn session(position: i64, rolling: bool) -> SessionSnapshot {
        SessionSnapshot {
            position,
            rolling,
            io_latency: 1024,
            ..SessionSnapshot::default()
        }
    }

    fn run(
        master: &mut Scripted,
        now: i64,
        s: &SessionSnapshot,
        state: &mut ChaseState,
    ) -> CycleOutcome {
        chase(master, &cycle(now), s, &SyncSettings::default(), state)
    }

    #[test]
    fn test_far_divergence_locates_with_preroll() {
        let mut master = Scripted::new().at(48_000, 0, 1.0);
        let mut state = ChaseState::new();

        let out = run(&mut master, 0, &session(0, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Locate);
        assert_eq!(out.decision.roll, RollDisposition::MustRoll);
        assert_eq!(out.decision.target, 48_000 + 1024 + 512);
        assert!(state.is_waiting());
    }

    #[test]
    fn test_within_resolution_relaxes() {
        let mut master = Scripted::new().at(10_000, 0, 1.0);
        let mut state = ChaseState::new();

        for k in 0..50 {
            let now = k * BLOCK as i64;
            let s = session(10_000 + now - 100, true);
            let out = run(&mut master, now, &s, &mut state);
            assert_eq!(out.decision.action, StrategyAction::Relax);
            assert!(out.valid);
            assert!(!out.block_disk_output);
        }
    }

    #[test]
    fn test_dll_catches_up_when_behind() {
        let mut master = Scripted::new().at(10_000, 0, 1.0);
        let mut state = ChaseState::new();
        let mut position = 10_000 - 400;

        let first = run(&mut master, 0, &session(position, true), &mut state);
        assert_eq!(first.ratio, 1.0);
        position += BLOCK as i64;

        let out = run(&mut master, BLOCK as i64, &session(position, true), &mut state);
        assert!(out.ratio > 1.0, "ratio {}", out.ratio);
    }

    #[test]
    fn test_beyond_resolution_blocks_disk_unless_recording() {
        let mut master = Scripted::new().at(10_000, 0, 1.0);
        let mut state = ChaseState::new();

        let out = run(&mut master, 0, &session(10_000 - 1000, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Relax);
        assert!(out.block_disk_output);

        let mut recording = session(10_000 - 1000, true);
        recording.actively_recording = true;
        let out = run(&mut master, 0, &recording, &mut state);
        assert!(!out.block_disk_output);
    }

    #[test]
    fn test_wait_then_start_with_seek() {
        let mut master = Scripted::new().at(48_000, 0, 1.0);
        let mut state = ChaseState::new();
        let out = run(&mut master, 0, &session(0, false), &mut state);
        let target = out.decision.target;
        assert_eq!(target, 49_536);

        let mut pending = session(0, false);
        pending.locate_pending = true;
        let out = run(&mut master, 512, &pending, &mut state);
        assert_eq!(out.decision.action, StrategyAction::Wait);

        // Locate done; master at 48512 is within io latency of the target
        let out = run(&mut master, 512, &session(target, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Start);
        assert_eq!(out.decision.start_seek(), Some(48_512));
        assert!(!state.is_waiting());
    }

    #[test]
    fn test_wait_holds_until_master_arrives() {
        let mut master = Scripted::new().at(40_000, 0, 1.0);
        let mut state = ChaseState::new();
        state.outstanding = Some(Outstanding {
            target: 48_000,
            roll: RollDisposition::MustRoll,
        });
        let out = run(&mut master, 0, &session(48_000, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Wait);
    }

    #[test]
    fn test_missed_start_relocates_with_longer_preroll() {
        let mut master = Scripted::new().at(60_000, 0, 1.0);
        let mut state = ChaseState::new();
        state.outstanding = Some(Outstanding {
            target: 48_000,
            roll: RollDisposition::MustRoll,
        });
        let out = run(&mut master, 0, &session(48_000, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Locate);
        assert_eq!(out.decision.target, 60_000 + 2 * 1536);
        assert_eq!(state.missed_starts, 1);
    }

    #[test]
    fn test_master_stops_session_stops() {
        let mut master = Scripted::new().at(10_000, 0, 0.0);
        let mut state = ChaseState::new();

        let out = run(&mut master, 0, &session(10_000, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Stop);

        let out = run(&mut master, 0, &session(10_000, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Relax);

        let out = run(&mut master, 0, &session(2_000, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Locate);
        assert_eq!(out.decision.roll, RollDisposition::MustStop);
        assert_eq!(out.decision.target, 10_000);
    }

    #[test]
    fn test_near_rolling_master_starts_directly() {
        let mut master = Scripted::new().at(10_000, 0, 1.0);
        let mut state = ChaseState::new();
        let out = run(&mut master, 0, &session(10_000, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Start);
        assert_eq!(out.decision.start_seek(), None);

        let out = run(&mut master, 0, &session(9_900, false), &mut state);
        assert_eq!(out.decision.start_seek(), Some(10_000));
    }

    #[test]
    fn test_seekahead_master_always_prerolls() {
        let mut master = Scripted::new().at(10_000, 0, 1.0);
        master.seekahead = Some(15_360);
        let mut state = ChaseState::new();
        let out = run(&mut master, 0, &session(10_000, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Locate);
        assert_eq!(out.decision.target, 10_000 + 15_360);
    }

    #[test]
    fn test_sample_clock_synced_quantizes() {
        let mut master = Scripted::new().at(10_000, 0, 1.0004);
        master.synced = true;
        let mut state = ChaseState::new();
        let out = run(&mut master, 0, &session(10_000, true), &mut state);
        assert_eq!(out.ratio, 1.0);

        let mut reverse = Scripted::new().at(10_000, 0, -0.7);
        reverse.synced = true;
        let out = run(&mut reverse, 0, &session(10_000, true), &mut state);
        assert_eq!(out.ratio, -1.0);
    }

    #[test]
    fn test_gating() {
        let mut state = ChaseState::new();

        let mut unusable = Scripted::new().at(0, 0, 1.0);
        unusable.usable = false;
        let out = run(&mut unusable, 0, &session(0, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::NoRoll);
        assert!(!out.valid);

        let mut dead = Scripted::new().at(0, 0, 1.0);
        dead.ok = false;
        let out = run(&mut dead, 0, &session(0, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Stop);
        assert_eq!(out.ratio, 1.0);
        assert!(!out.valid);

        let mut unlocked = Scripted::new().at(0, 0, 1.0);
        unlocked.locked = false;
        let out = run(&mut unlocked, 0, &session(0, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Stop);
        let out = run(&mut unlocked, 0, &session(0, false), &mut state);
        assert_eq!(out.decision.action, StrategyAction::NoRoll);

        let settings = SyncSettings {
            keep_rolling_on_sync_loss: true,
            ..SyncSettings::default()
        };
        let out = chase(&mut unlocked, &cycle(0), &session(0, true), &settings, &mut state);
        assert_eq!(out.decision.action, StrategyAction::Relax);
        assert!(!out.valid);
    }

    #[test]
    fn test_master_locate_request_wins() {
        let mut master = Scripted::new().at(0, 0, 1.0);
        master.request = Some(LocateRequest {
            target: 14_400_000,
            roll: RollDisposition::MustStop,
        });
        let mut state = ChaseState::new();
        let out = run(&mut master, 0, &session(0, true), &mut state);
        assert_eq!(out.decision.action, StrategyAction::Locate);
        assert_eq!(out.decision.target, 14_400_000);
        assert_eq!(out.decision.roll, RollDisposition::MustStop);
        assert!(!out.valid);
    }

    #[test]
    fn test_steady_chase_stays_at_unity() {
        let mut master = Scripted::new().at(48_000, 0, 1.0);
        let mut state = ChaseState::new();
        let mut position = 48_000;
        for k in 0..1000 {
            let now = k * BLOCK as i64;
            let out = run(&mut master, now, &session(position, true), &mut state);
            assert_abs_diff_eq!(out.ratio, 1.0, epsilon = 1e-3);
            position += (out.ratio * BLOCK as f64).round() as i64;
        }
    }
}
