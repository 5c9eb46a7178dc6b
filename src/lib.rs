// src/lib.rs

pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod logs;
pub mod proto;
pub mod sched;
pub mod server;
pub mod types;

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::backend::{LocalBackend, Target};
use crate::cli::{CliArgs, Command};
use crate::config::Settings;
use crate::logs::FileLogManager;
use crate::sched::TaskScheduler;
use crate::server::Server;
use crate::types::Resources;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = Settings::load_or_default(&args.config)
        .with_context(|| format!("loading settings from {}", args.config))?;

    match args.command {
        Command::Workers { cores, host, port } => run_workers(settings, cores, host, port).await,
        Command::Submit {
            name,
            script,
            working_dir,
            cores,
            after,
        } => run_submit(settings, name, script, working_dir, cores, after).await,
        Command::Status { name } => {
            let mut backend = LocalBackend::connect(&settings).await?;
            let status = backend.status(&name).await?;
            println!("{status}");
            backend.close().await?;
            Ok(())
        }
        Command::Cancel { name } => {
            let mut backend = LocalBackend::connect(&settings).await?;
            backend.cancel(&name).await?;
            backend.close().await?;
            Ok(())
        }
        Command::Logs { name, stderr } => {
            let backend = LocalBackend::connect(&settings).await?;
            let mut log = backend.logs(&name, stderr)?;
            std::io::copy(&mut log, &mut std::io::stdout())?;
            backend.close().await?;
            Ok(())
        }
    }
}

async fn run_workers(
    mut settings: Settings,
    cores: Option<u32>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(cores) = cores {
        settings.max_cores = Some(cores);
    }
    if let Some(host) = host {
        settings.host = host;
    }
    if let Some(port) = port {
        settings.port = port;
    }

    let log_manager = Arc::new(FileLogManager::new(&settings.log_dir));
    let scheduler = TaskScheduler::new(
        settings.effective_max_cores(),
        settings.kill_timeout(),
        log_manager,
    );

    let server = Server::start(&settings, Arc::clone(&scheduler)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutdown requested");

    server.shutdown().await;

    // Let tasks that are already running finish before exiting.
    scheduler.wait().await;
    Ok(())
}

async fn run_submit(
    settings: Settings,
    name: String,
    script: Option<String>,
    working_dir: Option<std::path::PathBuf>,
    cores: u32,
    after: Vec<String>,
) -> Result<()> {
    let script = match script {
        Some(script) => script,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading script from stdin")?;
            buffer
        }
    };

    let working_dir = match working_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let working_dir = working_dir
        .canonicalize()
        .with_context(|| format!("resolving working directory {}", working_dir.display()))?;

    let target = Target {
        name,
        script,
        working_dir,
        resources: Resources::with_cores(cores),
    };

    let mut backend = LocalBackend::connect(&settings).await?;
    let id = backend.submit(&target, &after).await?;
    println!("{id}");
    backend.close().await?;
    Ok(())
}
