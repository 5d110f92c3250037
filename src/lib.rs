//! # Lockstep - transport synchronization for audio sessions
//!
//! Chases an external time source with a session transport, sample-accurately
//! and without ever blocking the audio thread.
//!
//! ## Architecture
//!
//! Lockstep is an umbrella crate that coordinates:
//! - **lockstep-midi** - MIDI sync wire protocol (MTC, MIDI beat clock), optional hardware input
//! - **lockstep-core** - Seqlock snapshots, DLL, timecode, LTC codec, transport masters and the chase policy
//! - **lockstep-session** - Session transport, butler worker, process cycle, backend watcher
//!
//! ## Quick Start
//!
//! ```
//! use lockstep::prelude::*;
//!
//! let engine = LockstepEngine::builder()
//!     .sample_rate(48_000.0)
//!     .io_latency(1024)
//!     .build()?;
//!
//! // Chase the MIDI clock master
//! engine.manager().set_current(Some("MIDI Clock"))?;
//! engine.manager().set_external_sync(true);
//!
//! // Hand this to the audio callback
//! let processor = engine.take_processor();
//! assert!(processor.is_some());
//! # Ok::<(), lockstep::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `midi-io` - hardware MIDI input through midir

/// Re-export of lockstep-core for direct access
pub use lockstep_core as core;

/// Re-export of lockstep-session for direct access
pub use lockstep_session as session;

/// Re-export of lockstep-midi for direct access
pub use lockstep_midi as midi;

pub use lockstep_core::{
    AudioBackend, CycleContext, CycleOutcome, Dll, LtcDecoder, LtcEncoder, ManagerEvent,
    MasterConfig, MasterEnv, MasterStatus, RollDisposition, SessionSnapshot, SmpteFrameRate,
    SnapshotCell, StrategyAction, StrategyDecision, SyncSettings, SyncSource, Timecode,
    TransportMaster, TransportMasterManager, TransportMastersConfig,
};

pub use lockstep_session::{
    BackendEvent, ButlerMetricsSnapshot, DummyBackend, ProcessStatsSnapshot, Processor, Session,
};

pub use lockstep_midi::SyncMessage;

pub mod error;
pub use error::{Error, Result};

mod builder;
mod engine;

pub use builder::LockstepEngineBuilder;
pub use engine::LockstepEngine;

/// Convenience prelude for common imports
pub mod prelude {
    // Main engine
    pub use crate::{LockstepEngine, LockstepEngineBuilder};

    // Masters and policy
    pub use crate::{
        MasterConfig, RollDisposition, StrategyAction, SyncSettings, SyncSource,
        TransportMasterManager, TransportMastersConfig,
    };

    // Session
    pub use crate::{BackendEvent, Processor, Session};

    // Timecode
    pub use crate::{SmpteFrameRate, SyncMessage, Timecode};
}
