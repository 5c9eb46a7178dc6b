// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(
        "could not connect to workers at {addr}: {source}. \
         Workers can be started by running \"gwf-local workers\""
    )]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown dependency '{0}'")]
    UnknownDependency(TaskId),

    #[error("no task id recorded for target '{0}'")]
    Dependency(String),

    #[error("no log found for task {0}")]
    NoLogFound(TaskId),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BackendError>;
