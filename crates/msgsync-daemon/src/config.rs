//! Configuration loading and management.
//!
//! Values come from three layers, later ones winning:
//! 1. built-in defaults,
//! 2. an optional JSON file (`--config`),
//! 3. command-line flags / `MSGSYNC_*` environment variables.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Our peer id (a random UUID is generated when absent)
    #[serde(default)]
    pub peer_id: Option<String>,

    /// History keeps fewer than this many messages
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Receive buffer for discovery datagrams
    #[serde(default = "default_packet_buffer_length")]
    pub packet_buffer_length: usize,

    /// Address discovery probes are broadcast to
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,

    /// Port discovery probes are broadcast to (defaults to the messaging port)
    #[serde(default)]
    pub broadcast_port: Option<u16>,

    /// TCP messaging port; the discovery responder listens on the same UDP port
    #[serde(default = "default_messaging_port")]
    pub messaging_port: u16,

    /// Local HTTP API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Interface the listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Discovery receive window (and broadcast cadence)
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,

    /// Peers not rediscovered within this window are dropped
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Pause between synchronization rounds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// TCP connect timeout per peer
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for all exchanges of one round
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
}

fn default_history_limit() -> usize {
    100
}

fn default_packet_buffer_length() -> usize {
    4096
}

fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}

fn default_messaging_port() -> u16 {
    9876
}

fn default_api_port() -> u16 {
    8000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broadcast_timeout_ms() -> u64 {
    5_000
}

fn default_peer_timeout_ms() -> u64 {
    default_broadcast_timeout_ms() * 3
}

fn default_sync_interval_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_exchange_timeout_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: None,
            history_limit: default_history_limit(),
            packet_buffer_length: default_packet_buffer_length(),
            broadcast_address: default_broadcast_address(),
            broadcast_port: None,
            messaging_port: default_messaging_port(),
            api_port: default_api_port(),
            bind_address: default_bind_address(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            exchange_timeout_ms: default_exchange_timeout_ms(),
        }
    }
}

/// Command-line overrides, flattened into the binary's CLI.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a JSON config file
    #[arg(long, env = "MSGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Peer ID (generated if not provided)
    #[arg(long, env = "MSGSYNC_PEER_ID")]
    pub peer_id: Option<String>,

    /// Message history limit
    #[arg(long, env = "MSGSYNC_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    /// Broadcast address for discovery
    #[arg(long, env = "MSGSYNC_BROADCAST_ADDRESS")]
    pub broadcast_address: Option<String>,

    /// Broadcast port for discovery
    #[arg(long, env = "MSGSYNC_BROADCAST_PORT")]
    pub broadcast_port: Option<u16>,

    /// TCP/UDP port for peer messaging and discovery replies
    #[arg(long, env = "MSGSYNC_MESSAGING_PORT")]
    pub messaging_port: Option<u16>,

    /// Port for the local HTTP API
    #[arg(long, env = "MSGSYNC_API_PORT")]
    pub api_port: Option<u16>,

    /// Address to bind listeners to
    #[arg(long, env = "MSGSYNC_BIND")]
    pub bind: Option<String>,

    /// Discovery window in milliseconds
    #[arg(long, env = "MSGSYNC_BROADCAST_TIMEOUT_MS")]
    pub broadcast_timeout_ms: Option<u64>,

    /// Peer expiry in milliseconds
    #[arg(long, env = "MSGSYNC_PEER_TIMEOUT_MS")]
    pub peer_timeout_ms: Option<u64>,

    /// Pause between synchronization rounds in milliseconds
    #[arg(long, env = "MSGSYNC_SYNC_INTERVAL_MS")]
    pub sync_interval_ms: Option<u64>,

    /// Bound on connecting to a peer in milliseconds
    #[arg(long, env = "MSGSYNC_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Deadline for all peer exchanges of one round in milliseconds
    #[arg(long, env = "MSGSYNC_EXCHANGE_TIMEOUT_MS")]
    pub exchange_timeout_ms: Option<u64>,

    /// Discovery datagram buffer size in bytes
    #[arg(long, env = "MSGSYNC_PACKET_BUFFER_LENGTH")]
    pub packet_buffer_length: Option<usize>,
}

impl Config {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            tracing::info!("No config file given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the file named by `args`, apply the flag overrides and validate.
    pub fn from_args(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    /// Overlay every flag that was given.
    pub fn apply(&mut self, args: &ConfigArgs) {
        if let Some(v) = &args.peer_id {
            self.peer_id = Some(v.clone());
        }
        if let Some(v) = args.history_limit {
            self.history_limit = v;
        }
        if let Some(v) = &args.broadcast_address {
            self.broadcast_address = v.clone();
        }
        if let Some(v) = args.broadcast_port {
            self.broadcast_port = Some(v);
        }
        if let Some(v) = args.messaging_port {
            self.messaging_port = v;
        }
        if let Some(v) = args.api_port {
            self.api_port = v;
        }
        if let Some(v) = &args.bind {
            self.bind_address = v.clone();
        }
        if let Some(v) = args.broadcast_timeout_ms {
            self.broadcast_timeout_ms = v;
        }
        if let Some(v) = args.peer_timeout_ms {
            self.peer_timeout_ms = v;
        }
        if let Some(v) = args.sync_interval_ms {
            self.sync_interval_ms = v;
        }
        if let Some(v) = args.connect_timeout_ms {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = args.exchange_timeout_ms {
            self.exchange_timeout_ms = v;
        }
        if let Some(v) = args.packet_buffer_length {
            self.packet_buffer_length = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be at least 1".into()));
        }
        if self.packet_buffer_length == 0 {
            return Err(ConfigError::Invalid("packet_buffer_length must be positive".into()));
        }
        if matches!(self.peer_id.as_deref(), Some("")) {
            return Err(ConfigError::Invalid("peer_id cannot be empty".into()));
        }
        let timeouts = [
            ("broadcast_timeout_ms", self.broadcast_timeout_ms),
            ("peer_timeout_ms", self.peer_timeout_ms),
            ("sync_interval_ms", self.sync_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("exchange_timeout_ms", self.exchange_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Port discovery probes are sent to.
    pub fn broadcast_port(&self) -> u16 {
        self.broadcast_port.unwrap_or(self.messaging_port)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}
