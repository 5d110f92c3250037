//! Per-cycle decision records exchanged between the manager and the session.

use std::fmt;

/// What the session should do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyAction {
    /// In sync, nothing to do
    #[default]
    Relax,
    /// A locate is outstanding; wait for the master to come round
    Wait,
    /// Jump near the master
    Locate,
    /// Start rolling
    Start,
    /// Stop rolling
    Stop,
    /// Master unusable this cycle
    NoRoll,
}

impl fmt::Display for StrategyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyAction::Relax => "relax",
            StrategyAction::Wait => "wait",
            StrategyAction::Locate => "locate",
            StrategyAction::Start => "start",
            StrategyAction::Stop => "stop",
            StrategyAction::NoRoll => "no-roll",
        };
        f.write_str(s)
    }
}

/// Transport state to assume once a locate completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollDisposition {
    MustStop,
    MustRoll,
    #[default]
    RollIfAppropriate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyDecision {
    pub action: StrategyAction,
    /// Locate target, in samples. Meaningful for `Locate` and `Start`.
    pub target: i64,
    pub roll: RollDisposition,
    pub catch_speed: f64,
}

impl Default for StrategyDecision {
    fn default() -> Self {
        Self::relax(1.0)
    }
}

impl StrategyDecision {
    pub fn relax(catch_speed: f64) -> Self {
        Self {
            action: StrategyAction::Relax,
            target: 0,
            roll: RollDisposition::RollIfAppropriate,
            catch_speed,
        }
    }

    pub fn of(action: StrategyAction) -> Self {
        Self {
            action,
            ..Self::relax(1.0)
        }
    }

    pub fn locate(target: i64, roll: RollDisposition) -> Self {
        Self {
            action: StrategyAction::Locate,
            target,
            roll,
            catch_speed: 1.0,
        }
    }

    /// Start rolling, optionally after a micro-locate to `target`.
    pub fn start(target: Option<i64>) -> Self {
        Self {
            action: StrategyAction::Start,
            target: target.unwrap_or(-1),
            roll: RollDisposition::MustRoll,
            catch_speed: 1.0,
        }
    }

    /// Micro-locate attached to a `Start`, if any.
    pub fn start_seek(&self) -> Option<i64> {
        (self.action == StrategyAction::Start && self.target >= 0).then_some(self.target)
    }
}

/// Session transport state the policy consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    /// Audible position at the start of this cycle
    pub position: i64,
    pub rolling: bool,
    /// Speed the session runs at when not chasing
    pub nominal_speed: f64,
    pub actively_recording: bool,
    /// A locate has been handed to the butler and has not completed
    pub locate_pending: bool,
    /// Worst-case output latency, in samples
    pub io_latency: u32,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            position: 0,
            rolling: false,
            nominal_speed: 1.0,
            actively_recording: false,
            locate_pending: false,
            io_latency: 0,
        }
    }
}

/// Result of one manager cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    /// Resampling ratio for this cycle's I/O
    pub ratio: f64,
    pub decision: StrategyDecision,
    /// Master data was usable this cycle
    pub valid: bool,
    /// Suppress disk output this cycle
    pub block_disk_output: bool,
    /// The registry was busy; nothing was evaluated
    pub deferred: bool,
}

impl CycleOutcome {
    pub fn new(ratio: f64, decision: StrategyDecision, valid: bool) -> Self {
        Self {
            ratio,
            decision,
            valid,
            block_disk_output: false,
            deferred: false,
        }
    }

    /// Registry contention: treated like a pending locate.
    pub fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::new(1.0, StrategyDecision::of(StrategyAction::Wait), false)
        }
    }
}
