//! Error types for the fallible boundaries (registry, external commands, backup file)

use std::path::PathBuf;
use thiserror::Error;

/// An external command could not be launched or exited unsuccessfully.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed: {detail}")]
    Failed { program: String, detail: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} is not present in the registry")]
    NotFound(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("unexpected registry output for {setting}: {detail}")]
    Parse { setting: String, detail: String },
    #[error("could not broadcast the change to {setting}: {detail}")]
    Broadcast { setting: String, detail: String },
    #[error("{0} is only supported on Windows")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("no backup file found at {}", .0.display())]
    NoBackup(PathBuf),
    #[error("could not access backup file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backup file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backup file is corrupt: {0}")]
    Format(String),
    #[error("could not restore {setting}: {source}")]
    Store {
        setting: &'static str,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Please select at least one optimization to apply.")]
    Empty,
    #[error("unknown optimization: {0}")]
    UnknownAction(String),
}

/// A background run ended without handing back its result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("optimization worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("optimization worker stopped without reporting a result")]
    NoResult,
}
