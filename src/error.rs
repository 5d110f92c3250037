//! Centralized error type for the lockstep umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] lockstep_core::Error),

    #[error("Session: {0}")]
    Session(#[from] lockstep_session::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] lockstep_midi::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
