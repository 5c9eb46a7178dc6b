// src/client.rs

//! Client for a running local backend server.
//!
//! Speaks the same newline-framed JSON protocol as the server, one
//! request/response round trip per method call.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::errors::{BackendError, Result};
use crate::proto::{Request, Response, SubmitTask};
use crate::types::{Resources, TaskId, TaskStatus};

#[derive(Debug)]
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect to a server. A refused connection maps to
    /// [`BackendError::Connect`], which carries the hint that workers must
    /// be started first.
    pub async fn connect(host: &str, port: u16) -> Result<Client> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| BackendError::Connect { addr, source })?;
        let (reader, writer) = stream.into_split();
        Ok(Client {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Submit a script as a task.
    ///
    /// The task id is generated here, before the round trip, so callers can
    /// record it without waiting for the server's reply.
    pub async fn submit(
        &mut self,
        script: String,
        working_dir: PathBuf,
        env: Option<HashMap<String, String>>,
        resources: Resources,
        dependencies: Vec<TaskId>,
    ) -> Result<TaskId> {
        let id = TaskId::random();
        let request = Request::SubmitTask(SubmitTask {
            id,
            script,
            working_dir,
            env,
            resources,
            dependencies,
        });

        match self.round_trip(&request).await? {
            Response::Ok => Ok(id),
            other => Err(unexpected_reply("submit-task", &other)),
        }
    }

    /// Cancel the given task.
    pub async fn cancel(&mut self, id: TaskId) -> Result<()> {
        match self.round_trip(&Request::CancelTask { id }).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected_reply("cancel-task", &other)),
        }
    }

    /// Current status of the given task.
    pub async fn status(&mut self, id: TaskId) -> Result<TaskStatus> {
        match self.round_trip(&Request::GetStatus { id }).await? {
            Response::Status { status } => Ok(status),
            other => Err(unexpected_reply("get-status", &other)),
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).await?;
        if read == 0 {
            // The server closes the connection instead of replying when it
            // rejects a request.
            debug!("server closed the connection mid-request");
            return Err(BackendError::ConnectionClosed);
        }

        Ok(serde_json::from_str(reply.trim_end())?)
    }
}

fn unexpected_reply(request: &str, response: &Response) -> BackendError {
    BackendError::Protocol(format!("unexpected reply to {request}: {response:?}"))
}
