//! Periodic synchronization with every live peer.
//!
//! A round contacts all peers concurrently: each exchange pulls the peer's
//! history and pushes our pending messages that the peer does not hold yet.
//! The round waits for all exchanges up to one shared deadline, then clears
//! the pending set whether or not every push landed.

use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use msgsync_core::protocol::MAX_LINE_LENGTH;
use msgsync_core::{
    CodecError, Message, MessageId, MessageStore, Peer, PeerRegistry, Request, Response, Status,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Failure of a single peer exchange. Never fatal to the round.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] LinesCodecError),

    #[error("Invalid response: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Peer rejected the request: {0}")]
    Rejected(String),
}

/// Timing for the sync loop.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Bound on establishing each TCP connection
    pub connect_timeout: Duration,
    /// Shared deadline for all exchanges of one round
    pub exchange_timeout: Duration,
    /// Pause between rounds
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1000),
            exchange_timeout: Duration::from_millis(5000),
            interval: Duration::from_millis(5000),
        }
    }
}

/// Outcome counts for one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Live peers at the start of the round
    pub peers: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Exchanges still running at the deadline
    pub timed_out: usize,
    /// Messages pushed across all peers
    pub pushed: usize,
}

enum Outcome {
    Done(usize),
    Failed,
    TimedOut,
}

/// Pulls from and pushes to every peer in the registry.
#[derive(Clone)]
pub struct SyncEngine {
    peer_id: String,
    registry: Arc<PeerRegistry>,
    store: Arc<MessageStore>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        peer_id: String,
        registry: Arc<PeerRegistry>,
        store: Arc<MessageStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            peer_id,
            registry,
            store,
            config,
        }
    }

    /// Run rounds until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Sync engine started (interval {:?})", self.config.interval);
        while !cancel.is_cancelled() {
            let summary = self.run_round().await;
            if summary.peers > 0 {
                info!(
                    "Sync round: {} peer(s), {} ok, {} failed, {} timed out, {} message(s) pushed",
                    summary.peers, summary.succeeded, summary.failed, summary.timed_out, summary.pushed
                );
            } else {
                debug!("Sync round: no live peers");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        info!("Sync engine stopped");
    }

    /// Exchange with every live peer once, then clear the pending set.
    pub async fn run_round(&self) -> RoundSummary {
        let peers = self.registry.get_peers();
        let pending = Arc::new(self.store.get_pending_messages());
        let deadline = Instant::now() + self.config.exchange_timeout;

        let exchanges = peers.iter().cloned().map(|peer| {
            let engine = self.clone();
            let pending = pending.clone();
            async move {
                let address = peer.address();
                let mut handle =
                    tokio::spawn(async move { engine.exchange(&peer, &pending).await });

                match timeout_at(deadline, &mut handle).await {
                    Ok(Ok(Ok(pushed))) => Outcome::Done(pushed),
                    Ok(Ok(Err(e))) => {
                        warn!("Failed to perform message exchange with {}: {}", address, e);
                        Outcome::Failed
                    }
                    Ok(Err(e)) => {
                        warn!("Exchange task for {} did not complete: {}", address, e);
                        Outcome::Failed
                    }
                    Err(_) => {
                        handle.abort();
                        debug!("Exchange with {} exceeded the round deadline", address);
                        Outcome::TimedOut
                    }
                }
            }
        });

        let mut summary = RoundSummary {
            peers: peers.len(),
            ..RoundSummary::default()
        };
        for outcome in join_all(exchanges).await {
            match outcome {
                Outcome::Done(pushed) => {
                    summary.succeeded += 1;
                    summary.pushed += pushed;
                }
                Outcome::Failed => summary.failed += 1,
                Outcome::TimedOut => summary.timed_out += 1,
            }
        }

        self.store.clear_pending();
        summary
    }

    /// One pull/push conversation with `peer`. Returns how many pushed messages
    /// the peer confirmed.
    pub async fn exchange(
        &self,
        peer: &Peer,
        pending: &BTreeMap<MessageId, Message>,
    ) -> Result<usize, ExchangeError> {
        let address = peer.address();
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ExchangeError::ConnectTimeout(address.clone()))??;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        framed.send(Request::hello(&self.peer_id).to_line()).await?;
        let response = read_response(&mut framed).await?;
        if response.status == Some(Status::Error) {
            return Err(ExchangeError::Rejected(response.message.unwrap_or_default()));
        }

        let mut held = BTreeSet::new();
        let history = response.messages.unwrap_or_default();
        debug!("Received {} message(s) from {}", history.len(), peer.peer_id);
        for (id, message) in history {
            self.store.add_message(id, &message.peer_id, &message.message);
            held.insert(id);
        }

        // Push failures are logged and skipped; only a dead connection stops the loop
        let mut pushed = 0;
        for (id, message) in pending
            .iter()
            .filter(|(id, message)| !held.contains(*id) && message.peer_id != peer.peer_id)
        {
            let request = Request::new_message(&self.peer_id, *id, &message.message);
            if let Err(e) = framed.send(request.to_line()).await {
                warn!("Failed to push message {} to {}: {}", id, peer.peer_id, e);
                break;
            }
            match read_response(&mut framed).await {
                Ok(reply) if reply.is_ok() => {
                    debug!("Peer {} confirmed message {}", peer.peer_id, id);
                    pushed += 1;
                }
                Ok(reply) => {
                    warn!(
                        "Peer {} did not accept message {}: {}",
                        peer.peer_id,
                        id,
                        reply.message.unwrap_or_default()
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to get confirmation of message {} from {}: {}",
                        id, peer.peer_id, e
                    );
                }
            }
        }

        if pushed > 0 {
            debug!("Pushed {} message(s) to {}", pushed, peer.peer_id);
        }
        Ok(pushed)
    }
}

async fn read_response(
    framed: &mut Framed<TcpStream, LinesCodec>,
) -> Result<Response, ExchangeError> {
    let line = framed.next().await.ok_or(ExchangeError::Closed)??;
    Ok(Response::from_json(line.as_bytes())?)
}
