//! Commands for butler thread communication.

use crossbeam_channel::Sender;

/// Command sent to the butler thread.
#[derive(Debug)]
pub enum ButlerCommand {
    /// Settle a locate. `seq` is echoed back through the session once done.
    Locate { seq: u64, target: i64 },
    /// Refill playback buffers at the current position
    Refill,
    /// Reply once every earlier command has been handled
    Flush(Sender<()>),
    Shutdown,
}
