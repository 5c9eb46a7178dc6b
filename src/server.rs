// src/server.rs

//! TCP RPC server: accept loop, per-connection handlers, scheduler loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::Result;
use crate::proto::{Request, Response};
use crate::sched::TaskScheduler;
use crate::types::Task;

/// Handle to a running server.
///
/// Owns the accept loop and the scheduler loop; dropping it without calling
/// [`Server::shutdown`] leaves both running detached.
pub struct Server {
    scheduler: Arc<TaskScheduler>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_handle: JoinHandle<()>,
    scheduler_handle: JoinHandle<()>,
}

impl Server {
    /// Bind the listening socket and launch the accept and scheduler loops.
    ///
    /// Binding port 0 picks an ephemeral port; [`Server::local_addr`]
    /// reports the actual address.
    pub async fn start(settings: &Settings, scheduler: Arc<TaskScheduler>) -> Result<Server> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port)).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&scheduler),
            shutdown_rx,
        ));
        let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).schedule_forever());

        info!(addr = %local_addr, max_cores = scheduler.max_cores(), "server listening");

        Ok(Server {
            scheduler,
            local_addr,
            shutdown_tx,
            accept_handle,
            scheduler_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Stop accepting connections, then stop the scheduler loop.
    ///
    /// Running executors are left to finish; callers that want to block on
    /// them should `scheduler().wait()` afterwards.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.accept_handle.await;

        self.scheduler.shutdown();
        let _ = self.scheduler_handle.await;
        info!("server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    scheduler: Arc<TaskScheduler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        tokio::spawn(handle_connection(stream, Arc::clone(&scheduler)));
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("accept loop shutting down");
                break;
            }
        }
    }
}

/// Serve one connection: newline-framed JSON requests until the peer closes.
///
/// Malformed messages, unknown request types and rejected submissions all
/// close the connection without a reply; the dropped connection is the
/// error signal.
async fn handle_connection(stream: TcpStream, scheduler: Arc<TaskScheduler>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "connection read failed");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "malformed request; closing connection");
                break;
            }
        };

        let response = match request {
            Request::SubmitTask(submit) => match scheduler.enqueue_task(Task::from(submit)) {
                Ok(()) => Response::Ok,
                Err(err) => {
                    warn!(error = %err, "rejected submission; closing connection");
                    break;
                }
            },
            Request::CancelTask { id } => {
                scheduler.cancel_task(id);
                Response::Ok
            }
            Request::GetStatus { id } => Response::Status {
                status: scheduler.get_status(id),
            },
        };

        if let Err(err) = write_response(&mut writer, &response).await {
            debug!(error = %err, "connection write failed");
            break;
        }
    }

    debug!("connection closed");
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}
