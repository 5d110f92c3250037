//! Error types for lockstep-core.
//!
//! Only administrative and configuration paths return these. The per-cycle
//! audio path reports through flags and counters instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown transport master: {0}")]
    UnknownMaster(String),

    #[error("A transport master named '{0}' already exists")]
    DuplicateName(String),

    #[error("Cannot remove '{0}' while it is the current transport master")]
    RemoveCurrent(String),

    #[error("Transport master '{0}' is not removable")]
    NotRemovable(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
