// src/proto.rs

//! Wire types for the line-delimited JSON protocol.
//!
//! One JSON object per line, tagged by `type`. Unknown tags fail
//! deserialization, which the server answers by closing the connection.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Resources, Task, TaskId, TaskStatus};

/// Raw shape of a `submit-task` request.
///
/// `env` is nullable on the wire; [`Task`] normalizes it to an empty map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTask {
    pub id: TaskId,
    pub script: String,
    pub working_dir: PathBuf,
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl From<SubmitTask> for Task {
    fn from(submit: SubmitTask) -> Self {
        Task {
            id: submit.id,
            script: submit.script,
            working_dir: submit.working_dir,
            env: submit.env.unwrap_or_default(),
            resources: submit.resources,
            dependencies: submit.dependencies.into_iter().collect(),
        }
    }
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    SubmitTask(SubmitTask),
    CancelTask { id: TaskId },
    GetStatus { id: TaskId },
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Response {
    Ok,
    Status { status: TaskStatus },
}
