//! MIDI sync wire protocol for lockstep.
//!
//! Parses and encodes the MIDI messages transport masters consume:
//!
//! - **MTC quarter frames** (`F1 0nnndddd`), eight per two timecode frames
//! - **MTC full frames** (`F0 7F <dev> 01 01 hh mm ss ff F7`), sent after a locate
//! - **MIDI beat clock**: tick (`F8`), start, continue, stop and song position
//!
//! Hardware input through `midir` lives behind the `midi-io` feature.
//!
//! # Example
//!
//! ```
//! use lockstep_midi::{SyncMessage, MtcRate};
//!
//! let msg = SyncMessage::parse(&[0xF1, 0x72]).unwrap();
//! match msg {
//!     Some(SyncMessage::QuarterFrame(qf)) => {
//!         assert_eq!(qf.piece(), 7);
//!         assert_eq!(MtcRate::from_code(qf.value() >> 1), Some(MtcRate::Fps25));
//!     }
//!     _ => unreachable!(),
//! }
//! ```

pub mod error;
pub use error::{Error, Result};

mod message;
pub use message::{SyncMessage, CLOCK_PPQN};

pub mod mtc;
pub use mtc::{FullFrame, MtcRate, QuarterFrame};

#[cfg(feature = "midi-io")]
mod input;
#[cfg(feature = "midi-io")]
pub use input::{MidiInputDevice, MidiSyncInput};
