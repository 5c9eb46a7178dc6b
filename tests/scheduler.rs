// tests/scheduler.rs

//! Scheduler behaviour driven directly, with real `/bin/bash` children.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use gwf_local::errors::BackendError;
use gwf_local::logs::{FileLogManager, LogManager, LogMode};
use gwf_local::sched::TaskScheduler;
use gwf_local::types::{TaskId, TaskStatus};
use gwf_local_test_utils::builders::{TaskBuilder, task_id};
use gwf_local_test_utils::init_tracing;

fn scheduler_in(tmp: &TempDir, max_cores: u32) -> (Arc<TaskScheduler>, FileLogManager) {
    let log_dir = tmp.path().join("logs");
    let log_manager = FileLogManager::new(&log_dir);
    let scheduler = TaskScheduler::new(
        max_cores,
        Duration::from_secs(2),
        Arc::new(log_manager.clone()),
    );
    (scheduler, log_manager)
}

/// Poll until the task reaches `expected`, with an upper bound so a broken
/// scheduler fails the test instead of hanging it.
async fn wait_for_status(scheduler: &Arc<TaskScheduler>, id: TaskId, expected: TaskStatus) {
    let result = timeout(Duration::from_secs(10), async {
        loop {
            if scheduler.get_status(id) == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(
        result.is_ok(),
        "task {id} did not reach {expected} within 10s (currently {})",
        scheduler.get_status(id)
    );
}

#[tokio::test]
async fn single_task_completes_and_restores_cores() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).schedule_forever());

    let a = task_id(1);
    scheduler
        .enqueue_task(TaskBuilder::new(a).script("exit 0").build())
        .unwrap();
    assert_eq!(scheduler.get_status(a), TaskStatus::Submitted);

    wait_for_status(&scheduler, a, TaskStatus::Completed).await;
    assert_eq!(scheduler.available_cores(), 2);
    assert!(scheduler.queued_tasks().is_empty());
    assert!(scheduler.running_tasks().is_empty());

    scheduler.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn failing_task_fails_dependents_transitively() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, log_manager) = scheduler_in(&tmp, 2);

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).schedule_forever());

    let a = task_id(1);
    let b = task_id(2);
    let c = task_id(3);
    scheduler
        .enqueue_task(TaskBuilder::new(a).script("exit 1").build())
        .unwrap();
    scheduler
        .enqueue_task(TaskBuilder::new(b).after(a).build())
        .unwrap();
    scheduler
        .enqueue_task(TaskBuilder::new(c).after(b).build())
        .unwrap();

    wait_for_status(&scheduler, a, TaskStatus::Failed).await;
    wait_for_status(&scheduler, b, TaskStatus::Failed).await;
    wait_for_status(&scheduler, c, TaskStatus::Failed).await;

    // The dependents never ran, so no log sinks were ever opened for them.
    assert!(matches!(
        log_manager.open_stdout(b, LogMode::Read),
        Err(BackendError::NoLogFound(_))
    ));
    assert!(matches!(
        log_manager.open_stderr(c, LogMode::Read),
        Err(BackendError::NoLogFound(_))
    ));

    assert_eq!(scheduler.available_cores(), 2);
    scheduler.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn cancelling_a_running_task_flips_status_immediately() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).schedule_forever());

    let a = task_id(1);
    scheduler
        .enqueue_task(TaskBuilder::new(a).script("sleep 60").build())
        .unwrap();
    wait_for_status(&scheduler, a, TaskStatus::Running).await;

    scheduler.cancel_task(a);
    // The status flip is synchronous; the child dies in the background.
    assert_eq!(scheduler.get_status(a), TaskStatus::Cancelled);
    assert_eq!(scheduler.available_cores(), 2);

    // Cancelling again changes nothing.
    scheduler.cancel_task(a);
    assert_eq!(scheduler.get_status(a), TaskStatus::Cancelled);

    scheduler.shutdown();
    loop_handle.await.unwrap();
    timeout(Duration::from_secs(10), scheduler.wait())
        .await
        .expect("executors did not drain after cancellation");
}

#[tokio::test]
async fn at_most_max_cores_run_concurrently() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).schedule_forever());

    let ids = [task_id(1), task_id(2), task_id(3)];
    for id in ids {
        scheduler
            .enqueue_task(TaskBuilder::new(id).script("sleep 1").build())
            .unwrap();
    }

    let mut peak_running = 0;
    let all_done = timeout(Duration::from_secs(15), async {
        loop {
            let running = scheduler.running_tasks().len();
            peak_running = peak_running.max(running);
            assert!(running <= 2, "more than max_cores tasks running");

            if ids
                .iter()
                .all(|id| scheduler.get_status(*id) == TaskStatus::Completed)
            {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(all_done.is_ok(), "three one-second tasks did not finish");
    assert_eq!(peak_running, 2, "the core budget was never saturated");
    assert_eq!(scheduler.available_cores(), 2);

    scheduler.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn oversize_task_blocks_the_queue_head() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let a = task_id(1);
    let b = task_id(2);
    scheduler
        .enqueue_task(TaskBuilder::new(a).cores(4).build())
        .unwrap();
    scheduler.enqueue_task(TaskBuilder::new(b).build()).unwrap();

    for _ in 0..5 {
        scheduler.schedule_once();
    }

    // The oversize head never fits, and FIFO admission refuses to reorder
    // around it.
    assert_eq!(scheduler.get_status(a), TaskStatus::Submitted);
    assert_eq!(scheduler.get_status(b), TaskStatus::Submitted);
    assert_eq!(scheduler.queued_tasks(), vec![a, b]);
    assert_eq!(scheduler.available_cores(), 2);
}

#[tokio::test]
async fn unknown_dependency_is_rejected_without_trace() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let a = task_id(1);
    let ghost = task_id(999);
    let result = scheduler.enqueue_task(TaskBuilder::new(a).after(ghost).build());

    assert!(matches!(result, Err(BackendError::UnknownDependency(id)) if id == ghost));
    assert_eq!(scheduler.get_status(a), TaskStatus::Unknown);
    assert!(scheduler.queued_tasks().is_empty());
    assert!(scheduler.dependents_of(ghost).is_empty());
}

#[tokio::test]
async fn submitting_after_a_failed_dependency_fails_immediately() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let loop_handle = tokio::spawn(Arc::clone(&scheduler).schedule_forever());

    let a = task_id(1);
    scheduler
        .enqueue_task(TaskBuilder::new(a).script("exit 1").build())
        .unwrap();
    wait_for_status(&scheduler, a, TaskStatus::Failed).await;

    let b = task_id(2);
    scheduler
        .enqueue_task(TaskBuilder::new(b).after(a).build())
        .unwrap();
    assert_eq!(scheduler.get_status(b), TaskStatus::Failed);
    assert!(scheduler.dependents_of(a).contains(&b));
    assert!(scheduler.queued_tasks().is_empty());

    scheduler.shutdown();
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn cancelling_an_unknown_id_is_a_no_op() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 2);

    let ghost = task_id(42);
    scheduler.cancel_task(ghost);
    assert_eq!(scheduler.get_status(ghost), TaskStatus::Unknown);
}

#[tokio::test]
async fn cancelling_a_queued_task_removes_it_from_the_queue() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let (scheduler, _) = scheduler_in(&tmp, 1);

    let a = task_id(1);
    let b = task_id(2);
    scheduler.enqueue_task(TaskBuilder::new(a).build()).unwrap();
    scheduler
        .enqueue_task(TaskBuilder::new(b).after(a).build())
        .unwrap();

    scheduler.cancel_task(a);
    assert_eq!(scheduler.get_status(a), TaskStatus::Cancelled);
    // Cancellation counts as failure for dependents.
    assert_eq!(scheduler.get_status(b), TaskStatus::Failed);
    assert!(scheduler.queued_tasks().is_empty());
    assert_eq!(scheduler.available_cores(), 1);
}
