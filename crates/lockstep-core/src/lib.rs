//! Transport synchronization to external time sources.
//!
//! # Primary API
//!
//! - [`TransportMasterManager`]: the master registry and per-cycle chase policy
//! - [`TransportMaster`]: the capability set shared by every time source
//! - [`SnapshotCell`]: seqlock-guarded `(position, timestamp, speed)`
//! - [`Dll`]: second-order delay-locked loop
//! - [`LtcDecoder`] / [`LtcEncoder`]: linear timecode audio codec
//! - [`TransportMastersConfig`]: persisted master list and sync settings
//!
//! # Example
//!
//! ```
//! use lockstep_core::prelude::*;
//!
//! let env = MasterEnv {
//!     sample_rate: 48_000.0,
//!     timecode_format: SmpteFrameRate::Fps25,
//!     backend: None,
//! };
//! let manager = TransportMasterManager::from_config(&TransportMastersConfig::default(), env)?;
//! manager.set_current(Some("MTC"))?;
//! assert_eq!(manager.current_name().as_deref().map(String::as_str), Some("MTC"));
//! # Ok::<(), lockstep_core::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag};

pub mod snapshot;
pub use snapshot::{Snapshot, SnapshotCell, MAX_READ_RETRIES};

pub mod dll;
pub use dll::{apply_deadband, Dll, DllEstimate};

pub mod timecode;
pub use timecode::{SmpteFrameRate, Timecode};

pub mod ltc;
pub use ltc::{DecodedFrame, LtcDecoder, LtcEncoder, LtcFrame};

mod backend;
pub use backend::{AudioBackend, BackendTransport};

mod clock;
pub use clock::SampleClock;

pub mod master;
pub use master::{
    create_master, CycleContext, EngineMaster, LocateRequest, LtcAudioInput, LtcMaster,
    MasterEnv, MasterPosition, MidiClockMaster, MidiSyncSink, MtcMaster, SyncSource,
    TransportMaster,
};

pub mod manager;
pub use manager::{
    ChaseState, CycleOutcome, ManagerEvent, MasterStatus, RollDisposition, SessionSnapshot,
    StrategyAction, StrategyDecision, TransportMasterManager,
};

pub mod config;
pub use config::{MasterConfig, SyncSettings, TransportMastersConfig};

pub use lockstep_midi::SyncMessage;

pub mod prelude {
    pub use crate::{
        AudioBackend, CycleContext, CycleOutcome, Error, ManagerEvent, MasterConfig, MasterEnv,
        Result, RollDisposition, SampleClock, SessionSnapshot, SmpteFrameRate, StrategyAction,
        SyncSettings, SyncSource, Timecode, TransportMaster, TransportMasterManager,
        TransportMastersConfig,
    };
}
