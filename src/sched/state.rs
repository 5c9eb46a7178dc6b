// src/sched/state.rs

//! Mutex-guarded scheduler state and the status transition function.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::exec::Executor;
use crate::sched::TaskScheduler;
use crate::types::{Task, TaskId, TaskStatus};

/// Everything the scheduler mutates, guarded by one mutex in
/// [`TaskScheduler`].
///
/// Invariants, holding whenever the mutex is not held:
/// - an id is in `queue` (and `tasks`) iff its status is `SUBMITTED`;
/// - an id is in `executors` iff its status is `RUNNING`;
/// - `available_cores` equals the core budget minus the cores of all
///   `RUNNING` tasks;
/// - `dependents[d]` contains `t` only if `d` is a dependency of `t`;
/// - terminal statuses are absorbing.
pub struct SchedulerState {
    /// Ids of `SUBMITTED` tasks, in insertion order.
    pub(super) queue: Vec<TaskId>,
    /// Task records for `SUBMITTED` tasks. A record moves into its executor
    /// when the task starts.
    pub(super) tasks: HashMap<TaskId, Arc<Task>>,
    /// Status of every task ever seen.
    pub(super) status: HashMap<TaskId, TaskStatus>,
    /// Reverse dependency edges, populated at submit time.
    pub(super) dependents: HashMap<TaskId, HashSet<TaskId>>,
    /// Executors of `RUNNING` tasks.
    pub(super) executors: HashMap<TaskId, Executor>,
    pub(super) available_cores: u32,
}

impl SchedulerState {
    pub(super) fn new(max_cores: u32) -> Self {
        SchedulerState {
            queue: Vec::new(),
            tasks: HashMap::new(),
            status: HashMap::new(),
            dependents: HashMap::new(),
            executors: HashMap::new(),
            available_cores: max_cores,
        }
    }

    pub(super) fn status_of(&self, id: TaskId) -> TaskStatus {
        self.status.get(&id).copied().unwrap_or(TaskStatus::Unknown)
    }

    /// Apply a status transition, then any transitions it implies.
    ///
    /// This is the only place statuses change. Failure propagation to
    /// dependents is driven by an explicit work-list so the whole cascade
    /// happens inside the caller's critical section without re-entering the
    /// mutex.
    ///
    /// Disallowed transitions are ignored, as are transitions out of a
    /// terminal state.
    pub(super) fn apply(&mut self, sched: &Arc<TaskScheduler>, id: TaskId, status: TaskStatus) {
        let mut pending = vec![(id, status)];

        while let Some((id, next)) = pending.pop() {
            let current = self.status_of(id);
            if current == next || current.is_finished() {
                continue;
            }

            match (current, next) {
                (TaskStatus::Unknown, TaskStatus::Submitted) => {
                    // The record was placed in the queue by `enqueue_task`,
                    // which also validated that every dependency is known.
                    let Some(task) = self.tasks.get(&id).cloned() else {
                        continue;
                    };
                    let mut failed_dep = false;
                    for dep in &task.dependencies {
                        if self.status_of(*dep).is_failed() {
                            failed_dep = true;
                        }
                        self.dependents.entry(*dep).or_default().insert(id);
                    }
                    debug!(task = %id, "task submitted");
                    if failed_dep {
                        pending.push((id, TaskStatus::Failed));
                    }
                }
                (TaskStatus::Submitted, TaskStatus::Running) => {
                    let Some(task) = self.tasks.remove(&id) else {
                        continue;
                    };
                    self.queue.retain(|queued| *queued != id);
                    self.available_cores -= task.resources.cores;
                    debug!(
                        task = %id,
                        cores = task.resources.cores,
                        available_cores = self.available_cores,
                        "task started"
                    );
                    let mut executor = Executor::new(
                        task,
                        Arc::clone(sched),
                        sched.log_manager(),
                        sched.kill_timeout(),
                    );
                    executor.execute();
                    self.executors.insert(id, executor);
                }
                (TaskStatus::Submitted, TaskStatus::Cancelled | TaskStatus::Failed) => {
                    self.queue.retain(|queued| *queued != id);
                    self.tasks.remove(&id);
                    debug!(task = %id, status = %next, "queued task finished without running");
                }
                (TaskStatus::Running, TaskStatus::Cancelled) => {
                    if let Some(executor) = self.executors.remove(&id) {
                        self.available_cores += executor.task().resources.cores;
                        executor.cancel();
                    }
                    debug!(task = %id, "running task cancelled");
                }
                (TaskStatus::Running, TaskStatus::Completed | TaskStatus::Failed) => {
                    if let Some(executor) = self.executors.remove(&id) {
                        self.available_cores += executor.task().resources.cores;
                    }
                    debug!(task = %id, status = %next, "task finished");
                }
                _ => {
                    debug!(
                        task = %id,
                        from = %current,
                        to = %next,
                        "ignoring disallowed status transition"
                    );
                    continue;
                }
            }

            self.status.insert(id, next);

            if next.is_failed() {
                for dependent in self.dependents.get(&id).into_iter().flatten() {
                    pending.push((*dependent, TaskStatus::Failed));
                }
            }
        }
    }
}
