//! msgsync-core: shared types for LAN message synchronization.
//!
//! This crate provides the socket-free parts of the daemon:
//! - Wire protocol (`Request`/`Response` JSON lines)
//! - Peer registry with liveness expiry
//! - Bounded message store with pending-propagation tracking
//! - The messaging session state machine and discovery reply logic

pub mod discovery;
pub mod message;
pub mod peers;
pub mod protocol;
pub mod session;
pub mod store;

pub use discovery::{ProbeReply, classify_reply, hello_reply};
pub use message::{Message, MessageId};
pub use peers::{Peer, PeerRegistry};
pub use protocol::{CodecError, Command, Request, Response, Status};
pub use session::{ProtocolError, Session, SessionState};
pub use store::MessageStore;
