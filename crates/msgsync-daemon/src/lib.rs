//! msgsync-daemon library: the networked components of the daemon.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to drive them over real sockets.

pub mod api;
pub mod config;
pub mod discovery;
pub mod messaging;
pub mod sync;

// Re-export key types for convenience
pub use api::{ApiState, router};
pub use config::{Config, ConfigArgs, ConfigError};
pub use discovery::{DiscoveryProber, DiscoveryResponder};
pub use messaging::MessagingResponder;
pub use sync::{ExchangeError, RoundSummary, SyncConfig, SyncEngine};
