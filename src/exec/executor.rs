// src/exec/executor.rs

//! Individual task process supervision.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::logs::{LogManager, LogMode};
use crate::sched::TaskScheduler;
use crate::types::{Task, TaskId, TaskStatus};

/// How often the supervision loop polls the child and the stop flags.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the graceful-termination phase polls for exit.
const KILL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Stop requests, written by the scheduler and read by the supervision loop.
#[derive(Default)]
struct StopFlags {
    terminated: AtomicBool,
    cancelled: AtomicBool,
}

/// Runs exactly one task to a terminal status.
///
/// `execute` spawns the supervision future and returns immediately; the
/// executor's only effect on scheduler state is through the
/// [`TaskScheduler::set_status`] callback. It never retries.
pub struct Executor {
    task: Arc<Task>,
    scheduler: Arc<TaskScheduler>,
    log_manager: Arc<dyn LogManager>,
    kill_timeout: Duration,
    flags: Arc<StopFlags>,
    handle: Option<JoinHandle<()>>,
}

impl Executor {
    pub fn new(
        task: Arc<Task>,
        scheduler: Arc<TaskScheduler>,
        log_manager: Arc<dyn LogManager>,
        kill_timeout: Duration,
    ) -> Self {
        Executor {
            task,
            scheduler,
            log_manager,
            kill_timeout,
            flags: Arc::new(StopFlags::default()),
            handle: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Start supervising the task's process. Subsequent calls are no-ops.
    pub fn execute(&mut self) {
        if self.handle.is_some() {
            warn!(task = %self.task.id, "execute called twice; ignoring");
            return;
        }

        let task = Arc::clone(&self.task);
        let scheduler = Arc::clone(&self.scheduler);
        let log_manager = Arc::clone(&self.log_manager);
        let flags = Arc::clone(&self.flags);
        let kill_timeout = self.kill_timeout;

        self.handle = Some(tokio::spawn(async move {
            supervise(task, scheduler, log_manager, kill_timeout, flags).await;
        }));
    }

    /// Request a graceful stop, reported as `FAILED`.
    pub fn terminate(&self) {
        self.flags.terminated.store(true, Ordering::SeqCst);
    }

    /// Request a graceful stop, reported as `CANCELLED`.
    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for the supervision future to exit.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn supervise(
    task: Arc<Task>,
    scheduler: Arc<TaskScheduler>,
    log_manager: Arc<dyn LogManager>,
    kill_timeout: Duration,
    flags: Arc<StopFlags>,
) {
    scheduler.set_status(task.id, TaskStatus::Running);

    let status = match supervise_child(&task, log_manager.as_ref(), kill_timeout, &flags).await {
        Ok(status) => status,
        Err(err) => {
            error!(task = %task.id, error = %err, "executor failed unexpectedly");
            TaskStatus::Failed
        }
    };

    scheduler.set_status(task.id, status);
    debug!(task = %task.id, status = %status, "executor exiting");
}

async fn supervise_child(
    task: &Task,
    log_manager: &dyn LogManager,
    kill_timeout: Duration,
    flags: &StopFlags,
) -> anyhow::Result<TaskStatus> {
    let stdout = log_manager.open_stdout(task.id, LogMode::Write)?;
    let stderr = log_manager.open_stderr(task.id, LogMode::Write)?;

    let mut child = Command::new("/bin/bash")
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .current_dir(&task.working_dir)
        .envs(&task.env)
        .spawn()
        .with_context(|| format!("spawning shell for task {}", task.id))?;

    debug!(task = %task.id, pid = ?child.id(), "task process started");

    let mut stdin = child
        .stdin
        .take()
        .context("child stdin was not captured")?;
    stdin
        .write_all(task.script.as_bytes())
        .await
        .context("writing script to shell stdin")?;
    // Dropping the handle closes the pipe so the shell sees EOF.
    drop(stdin);

    loop {
        if let Some(exit) = child.try_wait()? {
            let code = exit.code();
            if exit.success() {
                return Ok(TaskStatus::Completed);
            }
            debug!(task = %task.id, exit_code = ?code, "task exited with failure");
            return Ok(TaskStatus::Failed);
        }

        if flags.terminated.load(Ordering::SeqCst) {
            terminate_gracefully(task.id, &mut child, kill_timeout).await;
            return Ok(TaskStatus::Failed);
        }

        if flags.cancelled.load(Ordering::SeqCst) {
            terminate_gracefully(task.id, &mut child, kill_timeout).await;
            return Ok(TaskStatus::Cancelled);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// SIGTERM, then up to `kill_timeout` of 1 s polls, then SIGKILL.
async fn terminate_gracefully(id: TaskId, child: &mut Child, kill_timeout: Duration) {
    if let Some(pid) = child.id() {
        debug!(task = %id, pid, "sending SIGTERM");
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    for _ in 0..kill_timeout.as_secs() {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => tokio::time::sleep(KILL_POLL_INTERVAL).await,
            Err(err) => {
                warn!(task = %id, error = %err, "polling child during termination failed");
                break;
            }
        }
    }

    warn!(task = %id, "task did not stop within the grace period; sending SIGKILL");
    if let Err(err) = child.kill().await {
        warn!(task = %id, error = %err, "failed to kill task process");
    }
}
