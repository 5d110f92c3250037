//! Linear timecode codec.

mod decoder;
mod encoder;
mod frame;

pub use decoder::{DecodedFrame, LtcDecoder};
pub use encoder::LtcEncoder;
pub use frame::{LtcFrame, FRAME_BITS, SYNC_WORD_FORWARD, SYNC_WORD_REVERSE};
