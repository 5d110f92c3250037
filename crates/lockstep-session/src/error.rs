//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Master registry or configuration error.
    #[error(transparent)]
    Core(#[from] lockstep_core::Error),

    /// The butler thread has exited or was never started.
    #[error("Butler is not running")]
    ButlerUnavailable,

    /// Spawning a worker thread failed.
    #[error("Failed to spawn {name} thread: {source}")]
    ButlerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
