//! Session transport driven by the realtime process cycle.
//!
//! - [`Session`]: atomically readable transport state and host requests
//! - [`Processor`]: the per-period audio-thread entry point
//! - [`Butler`]: non-realtime worker that settles locates and refills
//! - [`BackendWatcher`]: restarts masters after backend resets and xruns
//! - [`DummyBackend`]: a deterministic [`AudioBackend`](lockstep_core::AudioBackend)

pub mod error;
pub use error::{Error, Result};

mod session;
pub use session::{Session, TransportRequest};

pub mod butler;
pub use butler::{Butler, ButlerHandle, ButlerMetricsSnapshot};

mod process;
pub use process::{ProcessStats, ProcessStatsSnapshot, Processor};

mod watcher;
pub use watcher::{BackendEvent, BackendWatcher};

mod backend;
pub use backend::DummyBackend;
