// src/types.rs

//! Core domain types: task identifiers, statuses and the task record.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque 128-bit task identifier, unique per server lifetime.
///
/// Rendered as 32 lowercase hex digits on the wire and on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u128);

impl TaskId {
    /// Generate a fresh random identifier.
    ///
    /// Ids are generated on the client so that callers can persist them
    /// before the submit round trip completes.
    pub fn random() -> Self {
        TaskId(rand::random())
    }

    /// Build an identifier from a raw value (used by tests for
    /// deterministic ids).
    pub fn from_raw(raw: u128) -> Self {
        TaskId(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:032x})", self.0)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 32 {
            return Err(format!("invalid task id: {s:?} (expected up to 32 hex digits)"));
        }
        u128::from_str_radix(s, 16)
            .map(TaskId)
            .map_err(|_| format!("invalid task id: {s:?} (expected hex digits)"))
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Lifecycle status of a task as tracked by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Never seen by the scheduler.
    Unknown,
    /// Queued, waiting for dependencies and cores.
    Submitted,
    /// An executor is supervising the task's process.
    Running,
    /// Process exited with code 0.
    Completed,
    /// Process failed, a dependency failed, or supervision broke down.
    Failed,
    /// Cancelled by request, either while queued or while running.
    Cancelled,
}

impl TaskStatus {
    /// Failed terminal states: `FAILED` and `CANCELLED`.
    pub fn is_failed(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Terminal states. Absorbing: once entered, a task never leaves.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Unknown => "UNKNOWN",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

fn default_cores() -> u32 {
    1
}

/// Resource demands of a task.
///
/// `cores` is the only key the scheduler interprets; any additional keys are
/// preserved untouched so that richer backends can share the same wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default = "default_cores")]
    pub cores: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Resources {
    pub fn with_cores(cores: u32) -> Self {
        Resources {
            cores,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources::with_cores(default_cores())
    }
}

/// Immutable record of one task submission.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// UTF-8 shell script text, fed to `/bin/bash` on stdin.
    pub script: String,
    /// Directory the script runs in.
    pub working_dir: PathBuf,
    /// Environment layered over the server's own environment.
    pub env: HashMap<String, String>,
    pub resources: Resources,
    /// Ids of tasks that must complete before this one may run.
    pub dependencies: HashSet<TaskId>,
}
