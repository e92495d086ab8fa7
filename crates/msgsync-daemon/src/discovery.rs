//! UDP discovery: a responder answering `HELLO` probes and a prober
//! broadcasting them.
//!
//! The responder binds the same port number as the TCP messaging server, so
//! the source address of its reply is exactly where peers connect for sync.

use anyhow::Result;
use msgsync_core::discovery::{ProbeReply, classify_reply, hello_reply};
use msgsync_core::{PeerRegistry, Request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed receive so a persistent socket error cannot spin.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

async fn recv_failed(e: &std::io::Error) {
    warn!("Discovery receive failed: {}", e);
    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
}

/// Answers discovery probes with this node's peer id.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    peer_id: String,
    buffer_len: usize,
}

impl DiscoveryResponder {
    /// Bind the discovery socket.
    pub async fn bind(listen_addr: &str, peer_id: String, buffer_len: usize) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr).await?;
        info!("Discovery responder listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            peer_id,
            buffer_len,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve probes until cancelled. Errors never end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; self.buffer_len];
        loop {
            let (len, from) = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        recv_failed(&e).await;
                        continue;
                    }
                },
            };
            self.handle_datagram(&buf[..len], from).await;
        }
        info!("Discovery responder stopped");
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        debug!(
            "Received discovery request {} from {}",
            String::from_utf8_lossy(data),
            from
        );

        let reply = match hello_reply(&self.peer_id, data) {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to process discovery request from {}: {}", from, e);
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&reply.to_json(), from).await {
            error!("Failed to answer discovery request from {}: {}", from, e);
        }
    }
}

/// Broadcasts `HELLO` and records every peer that answers.
pub struct DiscoveryProber {
    socket: UdpSocket,
    peer_id: String,
    target: SocketAddr,
    window: Duration,
    buffer_len: usize,
    registry: Arc<PeerRegistry>,
}

impl DiscoveryProber {
    /// Open an ephemeral broadcast-enabled socket aimed at `target`.
    pub async fn bind(
        peer_id: String,
        target: SocketAddr,
        window: Duration,
        buffer_len: usize,
        registry: Arc<PeerRegistry>,
    ) -> Result<Self> {
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        info!("Discovery prober broadcasting to {} every {:?}", target, window);
        Ok(Self {
            socket,
            peer_id,
            target,
            window,
            buffer_len,
            registry,
        })
    }

    /// Probe until cancelled. Each round broadcasts once and then listens for
    /// the length of the window, so the window is also the broadcast cadence.
    pub async fn run(self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            self.probe_once(&cancel).await;
        }
        info!("Discovery prober stopped");
    }

    /// Broadcast one probe and collect replies until the window closes.
    pub async fn probe_once(&self, cancel: &CancellationToken) {
        let probe = Request::hello(&self.peer_id).to_json();
        debug!("Sending discovery probe to {}", self.target);
        if let Err(e) = self.socket.send_to(&probe, self.target).await {
            warn!("Failed to send discovery probe to {}: {}", self.target, e);
        }

        let deadline = Instant::now() + self.window;
        let mut buf = vec![0u8; self.buffer_len];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = timeout_at(deadline, self.socket.recv_from(&mut buf)) => match result {
                    Ok(Ok((len, from))) => self.handle_reply(&buf[..len], from),
                    Ok(Err(e)) => recv_failed(&e).await,
                    Err(_) => {
                        debug!("Discovery window of {:?} elapsed", self.window);
                        return;
                    }
                },
            }
        }
    }

    /// Act on one reply.
    pub fn handle_reply(&self, data: &[u8], from: SocketAddr) {
        match classify_reply(&self.peer_id, data) {
            ProbeReply::Discovered(peer_id) => {
                self.registry
                    .add_peer(&peer_id, &from.ip().to_string(), from.port());
            }
            ProbeReply::OwnEcho => {
                debug!("Ignoring our own discovery reply from {}", from);
            }
            ProbeReply::Rejected(message) => {
                warn!("Received error: {} from {}", message, from);
            }
            ProbeReply::Unparseable => {
                warn!(
                    "Could not parse discovery reply {} from {}",
                    String::from_utf8_lossy(data),
                    from
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgsync_core::Response;

    const WINDOW: Duration = Duration::from_millis(300);

    fn registry() -> Arc<PeerRegistry> {
        Arc::new(PeerRegistry::new(Duration::from_secs(15)))
    }

    async fn start_responder(peer_id: &str) -> (SocketAddr, CancellationToken) {
        let responder = DiscoveryResponder::bind("127.0.0.1:0", peer_id.to_string(), 4096)
            .await
            .unwrap();
        let addr = responder.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(responder.run(cancel.clone()));
        (addr, cancel)
    }

    async fn prober(peer_id: &str, target: SocketAddr, registry: Arc<PeerRegistry>) -> DiscoveryProber {
        DiscoveryProber::bind(peer_id.to_string(), target, WINDOW, 4096, registry)
            .await
            .unwrap()
    }

    // ==================== Responder ====================

    #[tokio::test]
    async fn test_responder_answers_hello() {
        let (addr, cancel) = start_responder("bob").await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(&Request::hello("alice").to_json(), addr).await.unwrap();

        let mut buf = [0u8; 4096];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, addr);
        assert_eq!(Response::from_json(&buf[..len]).unwrap(), Response::identity("bob"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_responder_ignores_non_hello_and_survives_garbage() {
        let (addr, cancel) = start_responder("bob").await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(b"garbage", addr).await.unwrap();
        client
            .send_to(&Request::new_message("alice", 1, "hi").to_json(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 4096];
        let silent = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(silent.is_err(), "non-hello traffic must not be answered");

        // Still serving afterwards
        client.send_to(&Request::hello("alice").to_json(), addr).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf)).await;
        assert!(reply.is_ok());
        cancel.cancel();
    }

    // ==================== Prober ====================

    #[tokio::test]
    async fn test_probe_discovers_responder() {
        let (addr, cancel) = start_responder("bob").await;
        let registry = registry();
        let prober = prober("alice", addr, registry.clone()).await;

        prober.probe_once(&cancel).await;

        let peers = registry.get_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "bob");
        assert_eq!(peers[0].ip_address, "127.0.0.1");
        assert_eq!(peers[0].port, addr.port());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_probe_with_same_id_discovers_nothing() {
        let (addr, cancel) = start_responder("alice").await;
        let registry = registry();
        let prober = prober("alice", addr, registry.clone()).await;

        prober.probe_once(&cancel).await;

        assert!(registry.get_peers().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_probe_window_ends_without_replies() {
        // Nothing listens on this socket's address once it is dropped
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();
        drop(silent);

        let registry = registry();
        let prober = prober("alice", target, registry.clone()).await;
        let started = std::time::Instant::now();
        prober.probe_once(&CancellationToken::new()).await;

        assert!(started.elapsed() >= WINDOW);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handle_reply_variants() {
        let registry = registry();
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let prober = prober("alice", target, registry.clone()).await;
        let from: SocketAddr = "10.0.0.7:9876".parse().unwrap();

        prober.handle_reply(&Response::identity("alice").to_json(), from);
        prober.handle_reply(&Response::error("Missing peer_id: {}").to_json(), from);
        prober.handle_reply(b"not json", from);
        assert!(registry.is_empty());

        prober.handle_reply(&Response::identity("carol").to_json(), from);
        let peers = registry.get_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address(), "10.0.0.7:9876");
    }

    #[tokio::test]
    async fn test_receive_error_backs_off() {
        let started = std::time::Instant::now();
        recv_failed(&std::io::Error::other("socket gone")).await;
        assert!(started.elapsed() >= RECV_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let registry = registry();
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let prober = prober("alice", target, registry).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(prober.run(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
