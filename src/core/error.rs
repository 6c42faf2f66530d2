//! Error types for probing, persistence and configuration

use std::path::PathBuf;

use thiserror::Error;

/// Failure to enumerate live processes
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The process table came back empty, which only happens when enumeration failed
    #[error("process enumeration returned no processes")]
    Enumeration,
    /// The process snapshot could not be accessed
    #[error("process snapshot unavailable: {0}")]
    Unavailable(String),
}

/// Failure to read or write persisted state
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("invalid timestamp {value:?} in column {column}")]
    Timestamp { column: &'static str, value: String },
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("settings encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to prepare database directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Invalid or missing startup input
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("check interval must be between 1 and {max} seconds, got {got}")]
    InvalidInterval { got: u64, max: u64 },
    #[error("dormant timeout must be between 1 and {max} seconds, got {got}")]
    InvalidDormantTimeout { got: u64, max: u64 },
    #[error("process name must not be empty")]
    EmptyProcessName,
    #[error("could not determine the current user, pass --user")]
    UnknownUser,
    #[error("could not determine a data directory, pass --database")]
    NoDataDirectory,
}

/// Any failure the tracker can hit while reconciling
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("reconciliation cycle aborted: {0}")]
    CycleAborted(String),
}
