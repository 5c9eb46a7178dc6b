// src/logs.rs

//! Per-task log storage.
//!
//! The executor opens a task's stdout/stderr sinks in write mode and hands
//! them straight to the child process; the facade opens them in read mode to
//! serve `logs` queries. The trait exists so tests can point the scheduler at
//! a scratch directory without touching the project's `.gwf/logs`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{BackendError, Result};
use crate::types::TaskId;

/// How a log handle will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Read,
    Write,
}

/// Opens per-task stdout/stderr sinks for write and read.
pub trait LogManager: Send + Sync {
    /// Open the task's stdout log.
    ///
    /// Fails with [`BackendError::NoLogFound`] when reading a log that does
    /// not exist.
    fn open_stdout(&self, id: TaskId, mode: LogMode) -> Result<File>;

    /// Open the task's stderr log. Same failure behaviour as `open_stdout`.
    fn open_stderr(&self, id: TaskId, mode: LogMode) -> Result<File>;
}

/// Log manager storing `<id>.stdout` / `<id>.stderr` files under one
/// directory, created on first write.
#[derive(Debug, Clone)]
pub struct FileLogManager {
    log_dir: PathBuf,
}

impl FileLogManager {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        FileLogManager {
            log_dir: log_dir.into(),
        }
    }

    /// Path of a task's stdout log file.
    pub fn stdout_path(&self, id: TaskId) -> PathBuf {
        self.log_dir.join(format!("{id}.stdout"))
    }

    /// Path of a task's stderr log file.
    pub fn stderr_path(&self, id: TaskId) -> PathBuf {
        self.log_dir.join(format!("{id}.stderr"))
    }

    fn open(&self, id: TaskId, path: &Path, mode: LogMode) -> Result<File> {
        match mode {
            LogMode::Read => {
                if !path.exists() {
                    return Err(BackendError::NoLogFound(id));
                }
                Ok(File::open(path)?)
            }
            LogMode::Write => {
                fs::create_dir_all(&self.log_dir)?;
                debug!(task = %id, path = %path.display(), "opening log sink");
                Ok(OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?)
            }
        }
    }
}

impl LogManager for FileLogManager {
    fn open_stdout(&self, id: TaskId, mode: LogMode) -> Result<File> {
        self.open(id, &self.stdout_path(id), mode)
    }

    fn open_stderr(&self, id: TaskId, mode: LogMode) -> Result<File> {
        self.open(id, &self.stderr_path(id), mode)
    }
}
