//! Socket server that owns the status store.
//!
//! Connections are served one at a time: a connection is drained until the
//! peer closes before the next `accept`. That sequencing is what serializes
//! access to the store, so no connection may ever be handed to a spawned task.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use clusterd_core::ResponseMode;
use clusterd_store::{StatusStore, StoreBatch, StoreError};

use crate::error::{io_err, DaemonError};
use crate::protocol::{self, Batch, BatchEnd, Command, Response};

/// Size of one receive in per-read mode.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct Dispatcher {
    listener: UnixListener,
    socket: PathBuf,
    store: StatusStore,
    mode: ResponseMode,
}

impl Dispatcher {
    /// Bind `socket`, replacing whatever file is already there, and restrict
    /// it to owner/group read-write. Must be called inside a tokio runtime.
    pub fn bind(socket: &Path, store: StatusStore, mode: ResponseMode) -> Result<Self, DaemonError> {
        if let Some(dir) = socket.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        remove_existing_socket(socket)?;

        let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
        set_socket_permissions(socket)?;
        tracing::info!(socket = %socket.display(), mode = ?mode, "dispatcher listening");

        Ok(Self {
            listener,
            socket: socket.to_path_buf(),
            store,
            mode,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Accept and drain connections until shutdown. An in-flight connection is
    /// always finished before shutdown is observed.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break Ok(()),
                accepted = self.listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(err) => break Err(io_err(&self.socket, err)),
                    };
                    tracing::trace!("accepted connection");
                    if let Err(err) = self.serve_connection(stream).await {
                        break Err(err);
                    }
                    tracing::trace!("closed connection");
                }
            }
        };

        if self.socket.exists() {
            let _ = fs::remove_file(&self.socket);
        }
        result
    }

    async fn serve_connection(&mut self, stream: UnixStream) -> Result<(), DaemonError> {
        match self.mode {
            ResponseMode::PerRead => self.serve_per_read(stream).await,
            ResponseMode::PerCommand => self.serve_per_command(stream).await,
        }
    }

    /// One decode/execute/reply cycle per receive.
    async fn serve_per_read(&mut self, mut stream: UnixStream) -> Result<(), DaemonError> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = match stream.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(read) => read,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping connection after read error");
                    return Ok(());
                }
            };

            let batch = protocol::decode(&buf[..read]);
            let responses = self.execute(&batch)?;
            let reply = protocol::frame_per_read(&responses);
            if let Err(err) = stream.write_all(&reply).await {
                tracing::warn!(error = %err, "dropping connection after write error");
                return Ok(());
            }
        }
    }

    /// Newline-delimited requests; one reply line per command.
    async fn serve_per_command(&mut self, stream: UnixStream) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping connection after read error");
                    return Ok(());
                }
            };

            let batch = protocol::decode(line.as_bytes());
            let responses = self.execute(&batch)?;
            let reply = protocol::frame_per_command(&responses);
            if let Err(err) = writer.write_all(&reply).await {
                tracing::warn!(error = %err, "dropping connection after write error");
                return Ok(());
            }
        }
    }

    /// Run every command of `batch` inside one transaction. A batch without
    /// commands opens no transaction.
    fn execute(&mut self, batch: &Batch) -> Result<Vec<Response>, DaemonError> {
        log_batch_end(&batch.end);
        if batch.is_empty() {
            tracing::debug!("nothing to do");
            return Ok(Vec::new());
        }
        Ok(execute_batch(&mut self.store, &batch.commands)?)
    }
}

/// Execute `commands` in order inside one store transaction.
pub fn execute_batch(
    store: &mut StatusStore,
    commands: &[Command],
) -> Result<Vec<Response>, StoreError> {
    store.with_batch(|tx| {
        commands
            .iter()
            .map(|command| execute_command(tx, command))
            .collect()
    })
}

fn execute_command(tx: &StoreBatch<'_>, command: &Command) -> Result<Response, StoreError> {
    tracing::debug!(command = command.verb().as_str(), "executing command");
    let response = match command {
        Command::Update1 { file_id } => {
            let affected = tx.set_all_pending_by_file(file_id)?;
            tracing::debug!(file = %file_id, affected, "marked file pending on all managers");
            Response::Ack
        }
        Command::Update2 {
            status,
            manager_id,
            file_id,
        } => {
            let affected = tx.set_status(*status, manager_id, file_id)?;
            tracing::debug!(manager = %manager_id, file = %file_id, %status, affected, "set status");
            Response::Ack
        }
        Command::Insert {
            manager_id,
            file_id,
        } => {
            tx.upsert(manager_id, file_id)?;
            Response::Ack
        }
        Command::Select {
            manager_id,
            limit,
            offset,
        } => Response::Rows(tx.query(manager_id, *limit, *offset)?),
        Command::Count { manager_id } => Response::Count(tx.count(manager_id)?),
    };
    Ok(response)
}

fn log_batch_end(end: &BatchEnd) {
    match end {
        BatchEnd::Complete => {}
        BatchEnd::UnknownVerb(token) => {
            tracing::debug!(token = %token, "unknown verb; nothing to do");
        }
        BatchEnd::Truncated(verb) => {
            tracing::debug!(verb = verb.as_str(), "discarding truncated trailing argument group");
        }
        BatchEnd::Malformed { verb, reason } => {
            tracing::warn!(verb = verb.as_str(), reason = %reason, "discarding malformed command");
        }
    }
}

/// Last writer wins: whatever sits at `socket` is removed without checking
/// whether another instance is listening on it.
fn remove_existing_socket(socket: &Path) -> Result<(), DaemonError> {
    match fs::remove_file(socket) {
        Ok(()) => {
            tracing::debug!(socket = %socket.display(), "removed existing socket file");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o660)).map_err(|e| io_err(path, e))
}
