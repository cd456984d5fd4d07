//! Newline-delimited JSON transport over TCP.
//!
//! The first line from a client is a [`Hello`] carrying its identity. The
//! transport is trusted: identity attachment happens outside the server.
//! Every following line is a [`Request`]. The server writes one
//! [`ServerMessage`] per line: responses in request order, pushes as they
//! are produced.

use crate::error::{ServerError, ServerResult};
use crate::messages::{Hello, PushFrame, Request, Response, ServerMessage};
use crate::server::LiveServer;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Accepts connections until `shutdown` completes.
pub async fn serve<F>(server: Arc<LiveServer>, listener: TcpListener, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()>,
{
    info!(addr = ?listener.local_addr().ok(), "live query server listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    if let Err(err) = handle_stream(server, stream).await {
                        debug!(%peer, error = %err, "connection ended with error");
                    }
                });
            }
            () = &mut shutdown => {
                info!("live query server shutting down");
                return Ok(());
            }
        }
    }
}

/// Serves one client until it disconnects.
pub async fn handle_stream(server: Arc<LiveServer>, stream: TcpStream) -> ServerResult<()> {
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut writer = BufWriter::new(write);

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let hello: Hello = match serde_json::from_str(&first) {
        Ok(hello) => hello,
        Err(err) => {
            let err = ServerError::InvalidRequest(format!("expected hello: {err}"));
            write_message(&mut writer, &ServerMessage::Response(Response::error(0, err.to_wire()))).await?;
            return Err(err);
        }
    };
    let mut handle = match server.connect(hello.hello) {
        Ok(handle) => handle,
        Err(err) => {
            write_message(&mut writer, &ServerMessage::Response(Response::error(0, err.to_wire()))).await?;
            return Err(err);
        }
    };
    let id = handle.id;

    let result = async {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok::<(), ServerError>(());
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = match serde_json::from_str::<Request>(&line) {
                        Ok(request) => server.handle_request(id, request),
                        Err(err) => {
                            warn!(connection = %id, error = %err, "malformed request");
                            Response::error(0, ServerError::InvalidRequest(err.to_string()).to_wire())
                        }
                    };
                    write_message(&mut writer, &ServerMessage::Response(response)).await?;
                }
                Some(push) = handle.pushes.recv() => {
                    write_message(&mut writer, &ServerMessage::Push(PushFrame { push })).await?;
                }
            }
        }
    }
    .await;

    server.disconnect(id);
    result
}

async fn write_message<W>(writer: &mut W, message: &ServerMessage) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)
        .map_err(|err| ServerError::InvalidRequest(format!("unserializable message: {err}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
