//! Peer registry for tracking peers found by discovery.
//!
//! Provides `PeerRegistry` for the live peer set and `Peer` for peer metadata.
//! Peers are identified by `(peer_id, ip_address, port)`; the check-in time is
//! metadata and does not take part in equality.
//!
//! Liveness: a peer whose check-in is older than the registry's expiry is
//! swept out the next time the peer set is read.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A peer discovered on the local network.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer's self-reported identifier (from the discovery reply)
    pub peer_id: String,
    /// Source IP of the discovery reply
    pub ip_address: String,
    /// Source port of the discovery reply (also its messaging port)
    pub port: u16,
    /// When the peer was first recorded
    pub last_checkin_at: Instant,
}

impl Peer {
    pub fn new(peer_id: String, ip_address: String, port: u16, last_checkin_at: Instant) -> Self {
        Self {
            peer_id,
            ip_address,
            port,
            last_checkin_at,
        }
    }

    /// `ip:port` form for connecting.
    pub fn address(&self) -> String {
        if self.ip_address.contains(':') {
            format!("[{}]:{}", self.ip_address, self.port)
        } else {
            format!("{}:{}", self.ip_address, self.port)
        }
    }

    fn is_expired(&self, now: Instant, expiry: Duration) -> bool {
        now.saturating_duration_since(self.last_checkin_at) > expiry
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id
            && self.ip_address == other.ip_address
            && self.port == other.port
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer_id.hash(state);
        self.ip_address.hash(state);
        self.port.hash(state);
    }
}

/// Registry of known peers.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` for shared ownership.
pub struct PeerRegistry {
    peers: Mutex<HashSet<Peer>>,
    expiry: Duration,
}

impl PeerRegistry {
    /// Create a registry that forgets peers not seen for `expiry`.
    pub fn new(expiry: Duration) -> Self {
        Self {
            peers: Mutex::new(HashSet::new()),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Record a peer, stamped now.
    ///
    /// Returns true if the peer was not known yet. A peer that is already
    /// known keeps its original entry, check-in time included.
    pub fn add_peer(&self, peer_id: &str, ip_address: &str, port: u16) -> bool {
        self.add_peer_at(peer_id, ip_address, port, Instant::now())
    }

    /// Record a peer with an explicit check-in time.
    pub fn add_peer_at(&self, peer_id: &str, ip_address: &str, port: u16, at: Instant) -> bool {
        let peer = Peer::new(peer_id.to_string(), ip_address.to_string(), port, at);
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let added = peers.insert(peer);
        if added {
            info!("Discovered peer {} at {}:{}", peer_id, ip_address, port);
        } else {
            debug!("Peer {} at {}:{} already known", peer_id, ip_address, port);
        }
        added
    }

    /// Live peers, after sweeping expired entries.
    pub fn get_peers(&self) -> Vec<Peer> {
        self.get_peers_at(Instant::now())
    }

    /// Live peers as of `now`, after sweeping entries expired at that time.
    ///
    /// Sweep and snapshot happen under one lock, so a returned peer is never
    /// one a concurrent caller has just removed.
    pub fn get_peers_at(&self, now: Instant) -> Vec<Peer> {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let expiry = self.expiry;
        peers.retain(|peer| {
            if peer.is_expired(now, expiry) {
                info!(
                    "Removing expired peer {} at {}:{} (last check-in {:?} ago)",
                    peer.peer_id,
                    peer.ip_address,
                    peer.port,
                    now.saturating_duration_since(peer.last_checkin_at)
                );
                false
            } else {
                true
            }
        });
        peers.iter().cloned().collect()
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
