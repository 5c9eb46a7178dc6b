// tests/server_client.rs

//! End-to-end scenarios over a real TCP server and client.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use gwf_local::client::Client;
use gwf_local::config::Settings;
use gwf_local::errors::BackendError;
use gwf_local::logs::FileLogManager;
use gwf_local::sched::TaskScheduler;
use gwf_local::server::Server;
use gwf_local::types::{Resources, TaskId, TaskStatus};
use gwf_local_test_utils::init_tracing;

fn test_settings(tmp: &TempDir) -> Settings {
    Settings {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_cores: Some(2),
        kill_timeout_secs: 2,
        log_dir: tmp.path().join("logs"),
        tracked_file: tmp.path().join("tracked.json"),
    }
}

async fn start_server(settings: &Settings) -> Server {
    let log_manager = Arc::new(FileLogManager::new(&settings.log_dir));
    let scheduler = TaskScheduler::new(
        settings.effective_max_cores(),
        settings.kill_timeout(),
        log_manager,
    );
    Server::start(settings, scheduler).await.unwrap()
}

async fn wait_for_client_status(client: &mut Client, id: TaskId, expected: TaskStatus) {
    let result = timeout(Duration::from_secs(10), async {
        loop {
            if client.status(id).await.unwrap() == expected {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "task {id} did not reach {expected} within 10s");
}

#[tokio::test]
async fn submitted_task_runs_to_completion() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;

    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();

    let id = client
        .submit(
            "exit 0".to_string(),
            tmp.path().to_path_buf(),
            None,
            Resources::with_cores(1),
            Vec::new(),
        )
        .await
        .unwrap();

    wait_for_client_status(&mut client, id, TaskStatus::Completed).await;
    assert_eq!(server.scheduler().available_cores(), 2);

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn task_output_lands_in_its_log_file() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;

    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();

    let env = std::collections::HashMap::from([(
        "GREETING".to_string(),
        "hello from the worker".to_string(),
    )]);
    let id = client
        .submit(
            "echo \"$GREETING\"".to_string(),
            tmp.path().to_path_buf(),
            Some(env),
            Resources::with_cores(1),
            Vec::new(),
        )
        .await
        .unwrap();
    wait_for_client_status(&mut client, id, TaskStatus::Completed).await;

    let log_manager = FileLogManager::new(&settings.log_dir);
    let stdout = std::fs::read_to_string(log_manager.stdout_path(id)).unwrap();
    assert_eq!(stdout.trim(), "hello from the worker");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn failure_propagates_and_the_dependent_never_runs() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;

    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();

    let a = client
        .submit(
            "exit 1".to_string(),
            tmp.path().to_path_buf(),
            None,
            Resources::with_cores(1),
            Vec::new(),
        )
        .await
        .unwrap();
    let b = client
        .submit(
            "exit 0".to_string(),
            tmp.path().to_path_buf(),
            None,
            Resources::with_cores(1),
            vec![a],
        )
        .await
        .unwrap();

    wait_for_client_status(&mut client, a, TaskStatus::Failed).await;
    wait_for_client_status(&mut client, b, TaskStatus::Failed).await;

    let log_manager = FileLogManager::new(&settings.log_dir);
    assert!(!log_manager.stdout_path(b).exists());
    assert!(!log_manager.stderr_path(b).exists());

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_running_task_kills_it() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;

    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();

    let id = client
        .submit(
            "sleep 60".to_string(),
            tmp.path().to_path_buf(),
            None,
            Resources::with_cores(1),
            Vec::new(),
        )
        .await
        .unwrap();
    wait_for_client_status(&mut client, id, TaskStatus::Running).await;

    client.cancel(id).await.unwrap();
    assert_eq!(client.status(id).await.unwrap(), TaskStatus::Cancelled);

    // Within kill_timeout plus slack the supervised child is gone.
    timeout(Duration::from_secs(5), server.scheduler().wait())
        .await
        .expect("executor did not drain after cancellation");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn at_most_two_tasks_run_at_once() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;

    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = client
            .submit(
                "sleep 1".to_string(),
                tmp.path().to_path_buf(),
                None,
                Resources::with_cores(1),
                Vec::new(),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    let all_done = timeout(Duration::from_secs(15), async {
        loop {
            assert!(server.scheduler().running_tasks().len() <= 2);

            let mut done = true;
            for id in &ids {
                if client.status(*id).await.unwrap() != TaskStatus::Completed {
                    done = false;
                }
            }
            if done {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(all_done.is_ok(), "three one-second tasks did not finish");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_dependency_closes_the_connection() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;

    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();

    let ghost = TaskId::random();
    let result = client
        .submit(
            "exit 0".to_string(),
            tmp.path().to_path_buf(),
            None,
            Resources::with_cores(1),
            vec![ghost],
        )
        .await;
    assert!(matches!(result, Err(BackendError::ConnectionClosed)));

    // The server is still healthy; a fresh connection works.
    let mut client = Client::connect(&settings.host, server.local_addr().port())
        .await
        .unwrap();
    assert_eq!(
        client.status(ghost).await.unwrap(),
        TaskStatus::Unknown
    );

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn connecting_to_a_stopped_server_fails_with_the_workers_hint() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let settings = test_settings(&tmp);
    let server = start_server(&settings).await;
    let port = server.local_addr().port();
    server.shutdown().await;

    let result = Client::connect(&settings.host, port).await;
    match result {
        Err(BackendError::Connect { addr, .. }) => {
            assert!(addr.contains(&port.to_string()));
        }
        other => panic!("expected a connect error, got {other:?}"),
    }
}
