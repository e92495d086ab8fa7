//! TCP messaging server.
//!
//! Each accepted connection runs on its own task with a fresh [`Session`].
//! Requests and responses are single JSON lines. There is no cap on
//! concurrent connections.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use msgsync_core::protocol::MAX_LINE_LENGTH;
use msgsync_core::{MessageStore, Response, Session};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LISTEN_BACKLOG: u32 = 1024;

/// Accepts peer exchanges and answers them from the message store.
pub struct MessagingResponder {
    listener: TcpListener,
    store: Arc<MessageStore>,
}

impl MessagingResponder {
    /// Bind the listener with `SO_REUSEADDR` so a restart can reclaim the port.
    pub fn bind(listen_addr: SocketAddr, store: Arc<MessageStore>) -> Result<Self> {
        let socket = if listen_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(listen_addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        info!("Messaging server listening on {}", listener.local_addr()?);

        Ok(Self { listener, store })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled.
    ///
    /// Sessions already in progress are left to finish on their own.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let store = self.store.clone();
                        tokio::spawn(serve_connection(stream, addr, store));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
        info!("Messaging server stopped");
    }
}

/// Drive one session to completion.
///
/// The session ends on EOF, on an empty line, or after the first protocol
/// error. Malformed input, including invalid UTF-8, is answered before closing.
async fn serve_connection(stream: TcpStream, addr: SocketAddr, store: Arc<MessageStore>) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut session = Session::new();

    while let Some(frame) = framed.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("Request from {} exceeds {} bytes", addr, MAX_LINE_LENGTH);
                let reply = Response::error(format!(
                    "Request exceeds the maximum length of {} bytes",
                    MAX_LINE_LENGTH
                ));
                let _ = framed.send(reply.to_line()).await;
                break;
            }
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Undecodable request from {}: {}", addr, e);
                let reply = Response::error(format!("Invalid request: {}", e));
                let _ = framed.send(reply.to_line()).await;
                break;
            }
            Err(LinesCodecError::Io(e)) => {
                debug!("Connection {} failed: {}", addr, e);
                break;
            }
        };

        if line.trim().is_empty() {
            debug!("Empty line from {}, ending session", addr);
            break;
        }

        debug!("Received {} from {}", line, addr);
        let (reply, keep_open) = match session.handle(&line, &store) {
            Ok(reply) => (reply, true),
            Err(e) => {
                warn!("Failed to process message exchange with {}: {}", addr, e);
                (Response::error(e.to_string()), false)
            }
        };

        if let Err(e) = framed.send(reply.to_line()).await {
            warn!("Failed to reply to {}: {}", addr, e);
            break;
        }
        if !keep_open {
            break;
        }
    }

    match session.remote_peer_id() {
        Some(peer_id) => debug!("Session with {} ({}) closed", peer_id, addr),
        None => debug!("Connection from {} closed", addr),
    }
}
