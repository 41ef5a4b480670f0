use std::io::ErrorKind;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::sleep;

use clusterd_core::ResponseMode;

use crate::error::{io_err, DaemonError};
use crate::paths::{CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY};
use crate::protocol::{self, Command};

/// Send one command on a fresh connection and return the response text.
///
/// Connecting is retried briefly while the socket is missing or refusing, so
/// a dispatcher that is still binding does not fail the caller. The response
/// read has no deadline: the dispatcher serves one connection at a time, so a
/// reply may wait for however long another client holds its connection.
pub async fn send_command(
    socket: &Path,
    mode: ResponseMode,
    command: &Command,
) -> Result<String, DaemonError> {
    let mut stream = connect(socket).await?;

    stream
        .write_all(&protocol::encode_request(command, mode))
        .await
        .map_err(|e| io_err(socket, e))?;
    stream.shutdown().await.map_err(|e| io_err(socket, e))?;

    let reply = read_response(&mut stream, protocol::terminator(mode))
        .await
        .map_err(|e| io_err(socket, e))?;

    Ok(String::from_utf8_lossy(&reply).into_owned())
}

async fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match UnixStream::connect(socket).await {
            Ok(stream) => return Ok(stream),
            Err(err)
                if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) =>
            {
                if attempt >= CONNECT_ATTEMPTS {
                    return Err(DaemonError::DaemonNotRunning {
                        socket: socket.to_path_buf(),
                    });
                }
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(err) => return Err(io_err(socket, err)),
        }
    }
}

/// Read until `terminator` or EOF; the terminator is not included.
async fn read_response(stream: &mut UnixStream, terminator: u8) -> std::io::Result<Vec<u8>> {
    let mut reply = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(reply);
        }
        if let Some(end) = chunk[..read].iter().position(|&b| b == terminator) {
            reply.extend_from_slice(&chunk[..end]);
            return Ok(reply);
        }
        reply.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn missing_socket_reports_not_running_after_retries() {
        let tmp = TempDir::new().unwrap();
        let socket = tmp.path().join("cluster_db");
        let err = send_command(
            &socket,
            ResponseMode::PerRead,
            &Command::Count {
                manager_id: "node01".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }), "got: {err}");
    }
}
