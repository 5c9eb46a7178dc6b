// src/backend.rs

//! The backend facade used by workflow tooling.
//!
//! Translates user-visible target names into server task ids via a
//! persistent tracking file, and narrows server statuses to the
//! backend-neutral set.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::Client;
use crate::config::Settings;
use crate::errors::{BackendError, Result};
use crate::logs::{FileLogManager, LogManager, LogMode};
use crate::types::{Resources, TaskId, TaskStatus};

/// Environment variable naming the target a task was submitted for.
pub const GWF_TARGET_NAME: &str = "GWF_TARGET_NAME";

/// Backend-neutral status of a target.
///
/// Terminal server statuses collapse to `Unknown` here on purpose: at this
/// boundary a finished target is indistinguishable from one that was never
/// submitted, and downstream tooling decides freshness by other means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Unknown,
    Submitted,
    Running,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetStatus::Unknown => "UNKNOWN",
            TargetStatus::Submitted => "SUBMITTED",
            TargetStatus::Running => "RUNNING",
        };
        f.write_str(name)
    }
}

/// A fully materialized target, ready for submission.
///
/// Building targets out of a workflow definition is the workflow engine's
/// job; the backend only consumes the result.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub script: String,
    pub working_dir: PathBuf,
    pub resources: Resources,
}

/// Persistent target-name → task-id mapping.
///
/// Loaded leniently (a missing file is an empty map) and rewritten
/// atomically on [`TrackedIds::persist`]: the new contents go to a sibling
/// temp file which is then renamed over the original.
#[derive(Debug)]
pub struct TrackedIds {
    path: PathBuf,
    map: BTreeMap<String, TaskId>,
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct TrackedFile(BTreeMap<String, TaskId>);

impl TrackedIds {
    pub fn load(path: impl Into<PathBuf>) -> Result<TrackedIds> {
        let path = path.into();
        let map = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let TrackedFile(map) = serde_json::from_str(&contents)?;
            map
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), tracked = map.len(), "loaded tracked ids");
        Ok(TrackedIds { path, map })
    }

    pub fn get(&self, name: &str) -> Option<TaskId> {
        self.map.get(name).copied()
    }

    pub fn insert(&mut self, name: &str, id: TaskId) {
        self.map.insert(name.to_string(), id);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(&TrackedFile(self.map.clone()))?;
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), tracked = self.map.len(), "persisted tracked ids");
        Ok(())
    }
}

/// Backend that runs targets on a pool of local workers.
///
/// Connects to a server started with `gwf-local workers`; submissions,
/// cancellations and status queries go over that connection, keyed by the
/// tracked target names.
pub struct LocalBackend {
    client: Client,
    tracked: TrackedIds,
    log_manager: FileLogManager,
}

impl LocalBackend {
    pub async fn connect(settings: &Settings) -> Result<LocalBackend> {
        let client = Client::connect(&settings.host, settings.port).await?;
        let tracked = TrackedIds::load(&settings.tracked_file)?;
        Ok(LocalBackend {
            client,
            tracked,
            log_manager: FileLogManager::new(&settings.log_dir),
        })
    }

    /// Task id recorded for a target name, if any.
    pub fn task_id(&self, target_name: &str) -> Option<TaskId> {
        self.tracked.get(target_name)
    }

    /// Submit a target whose dependencies are named targets submitted
    /// earlier (in this or a previous session).
    ///
    /// Fails with [`BackendError::Dependency`] if a dependency name has no
    /// recorded task id.
    pub async fn submit(&mut self, target: &Target, dependencies: &[String]) -> Result<TaskId> {
        let mut dependency_ids = Vec::with_capacity(dependencies.len());
        for name in dependencies {
            let id = self
                .tracked
                .get(name)
                .ok_or_else(|| BackendError::Dependency(name.clone()))?;
            dependency_ids.push(id);
        }

        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.insert(GWF_TARGET_NAME.to_string(), target.name.clone());

        let id = self
            .client
            .submit(
                target.script.clone(),
                target.working_dir.clone(),
                Some(env),
                target.resources.clone(),
                dependency_ids,
            )
            .await?;

        self.tracked.insert(&target.name, id);
        debug!(target = %target.name, task = %id, "target submitted");
        Ok(id)
    }

    /// Backend-neutral status of a target.
    pub async fn status(&mut self, target_name: &str) -> Result<TargetStatus> {
        let Some(id) = self.tracked.get(target_name) else {
            return Ok(TargetStatus::Unknown);
        };

        let status = match self.client.status(id).await? {
            TaskStatus::Running => TargetStatus::Running,
            TaskStatus::Submitted => TargetStatus::Submitted,
            _ => TargetStatus::Unknown,
        };
        Ok(status)
    }

    /// Cancel a target's task.
    pub async fn cancel(&mut self, target_name: &str) -> Result<()> {
        let id = self
            .tracked
            .get(target_name)
            .ok_or_else(|| BackendError::Dependency(target_name.to_string()))?;
        self.client.cancel(id).await
    }

    /// Open a target's stdout (or stderr) log for reading.
    pub fn logs(&self, target_name: &str, stderr: bool) -> Result<File> {
        let id = self
            .tracked
            .get(target_name)
            .ok_or_else(|| BackendError::Dependency(target_name.to_string()))?;
        if stderr {
            self.log_manager.open_stderr(id, LogMode::Read)
        } else {
            self.log_manager.open_stdout(id, LogMode::Read)
        }
    }

    /// Persist the tracked mapping and close the connection.
    pub async fn close(self) -> Result<()> {
        self.tracked.persist()?;
        self.client.close().await
    }
}
