// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeguardError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The marker store could not be read or written.
    #[error("Marker store unavailable: {0}")]
    MarkerStoreUnavailable(String),

    /// The trigger slot could not be read or written.
    #[error("Trigger channel error: {0}")]
    TriggerError(String),

    /// Posting a trigger while one is already waiting in the slot.
    #[error("Trigger slot already occupied")]
    TriggerOccupied,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipeguardError>;
