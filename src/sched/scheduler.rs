// src/sched/scheduler.rs

//! The thread-safe scheduler API and its scheduling loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{BackendError, Result};
use crate::logs::LogManager;
use crate::sched::state::SchedulerState;
use crate::types::{Task, TaskId, TaskStatus};

/// Cadence of the scheduling loop and of `wait` polling.
const SCHEDULE_INTERVAL: Duration = Duration::from_millis(100);

/// Dependency-aware task scheduler with a fixed core budget.
///
/// All mutable state lives behind one mutex; every public operation is a
/// complete atomic transition, and critical sections never block on I/O or
/// await. Executors call back into [`TaskScheduler::set_status`] to report
/// terminal progress.
pub struct TaskScheduler {
    max_cores: u32,
    kill_timeout: Duration,
    log_manager: Arc<dyn LogManager>,
    state: Mutex<SchedulerState>,
    shutdown: AtomicBool,
}

impl TaskScheduler {
    pub fn new(
        max_cores: u32,
        kill_timeout: Duration,
        log_manager: Arc<dyn LogManager>,
    ) -> Arc<Self> {
        Arc::new(TaskScheduler {
            max_cores,
            kill_timeout,
            log_manager,
            state: Mutex::new(SchedulerState::new(max_cores)),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn max_cores(&self) -> u32 {
        self.max_cores
    }

    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout
    }

    pub fn log_manager(&self) -> Arc<dyn LogManager> {
        Arc::clone(&self.log_manager)
    }

    /// Queue a task for execution.
    ///
    /// Every dependency must already be known to the scheduler; otherwise
    /// the submission is rejected with [`BackendError::UnknownDependency`]
    /// and leaves no trace. A dependency that already failed or was
    /// cancelled sends the new task straight to `FAILED`.
    pub fn enqueue_task(self: &Arc<Self>, task: Task) -> Result<()> {
        let mut state = self.lock();

        for dep in &task.dependencies {
            if !state.status.contains_key(dep) {
                return Err(BackendError::UnknownDependency(*dep));
            }
        }

        let id = task.id;
        if state.status_of(id) != TaskStatus::Unknown {
            debug!(task = %id, "ignoring resubmission of known task id");
            return Ok(());
        }

        state.queue.push(id);
        state.tasks.insert(id, Arc::new(task));
        state.apply(self, id, TaskStatus::Submitted);
        Ok(())
    }

    /// Cancel a task. Idempotent; unknown ids are a no-op.
    pub fn cancel_task(self: &Arc<Self>, id: TaskId) {
        let mut state = self.lock();
        state.apply(self, id, TaskStatus::Cancelled);
    }

    /// Current status of a task, `UNKNOWN` for never-seen ids.
    pub fn get_status(&self, id: TaskId) -> TaskStatus {
        self.lock().status_of(id)
    }

    /// Report a status transition. Called by executors; also drives failure
    /// propagation to dependents within the same critical section.
    pub fn set_status(self: &Arc<Self>, id: TaskId, status: TaskStatus) {
        let mut state = self.lock();
        state.apply(self, id, status);
    }

    /// One admission pass: walk the queue in insertion order and start every
    /// task whose dependencies completed and whose core demand fits.
    ///
    /// The scan stops at the first task that does not fit, so an oversize
    /// task at the head of the queue blocks everything behind it. Tasks with
    /// a failed dependency are failed here (propagation included).
    pub fn schedule_once(self: &Arc<Self>) {
        let mut state = self.lock();

        let mut available = state.available_cores;
        let mut to_fail = Vec::new();
        let mut to_run = Vec::new();

        for id in &state.queue {
            if available == 0 {
                break;
            }

            let task = &state.tasks[id];

            if task
                .dependencies
                .iter()
                .any(|dep| state.status_of(*dep).is_failed())
            {
                to_fail.push(*id);
                continue;
            }

            let ready = task
                .dependencies
                .iter()
                .all(|dep| state.status_of(*dep) == TaskStatus::Completed);
            if !ready {
                continue;
            }

            if task.resources.cores > available {
                break;
            }

            available -= task.resources.cores;
            to_run.push(*id);
        }

        for id in to_fail {
            state.apply(self, id, TaskStatus::Failed);
        }
        for id in to_run {
            state.apply(self, id, TaskStatus::Running);
        }
    }

    /// Run admission passes every ~100 ms until [`TaskScheduler::shutdown`]
    /// is called.
    pub async fn schedule_forever(self: Arc<Self>) {
        debug!("scheduler loop started");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.schedule_once();
            tokio::time::sleep(SCHEDULE_INTERVAL).await;
        }
        info!("scheduler loop stopped");
    }

    /// Ask the scheduling loop to exit at its next iteration. Running
    /// executors are allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block until no executor is running.
    pub async fn wait(&self) {
        loop {
            let running = self.lock().executors.len();
            if running == 0 {
                return;
            }
            debug!(running, "waiting for executors to finish");
            tokio::time::sleep(SCHEDULE_INTERVAL).await;
        }
    }

    /// Cores not currently claimed by a running task.
    pub fn available_cores(&self) -> u32 {
        self.lock().available_cores
    }

    /// Ids of queued (`SUBMITTED`) tasks, in insertion order.
    pub fn queued_tasks(&self) -> Vec<TaskId> {
        self.lock().queue.clone()
    }

    /// Ids of `RUNNING` tasks.
    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.lock().executors.keys().copied().collect()
    }

    /// Reverse dependency edges registered for `id`.
    pub fn dependents_of(&self, id: TaskId) -> HashSet<TaskId> {
        self.lock()
            .dependents
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("scheduler mutex poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }
}
