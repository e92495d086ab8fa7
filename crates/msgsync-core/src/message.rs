//! Message record stored in history and carried on the wire.

use serde::{Deserialize, Serialize};

/// Message identifier: milliseconds since the Unix epoch at creation time.
pub type MessageId = u64;

/// A text message and the peer it is attributed to.
///
/// The identifier lives outside the record (as the key of the history map),
/// matching the wire shape `{"<id>": {"peer_id": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub peer_id: String,
    pub message: String,
}

impl Message {
    pub fn new(peer_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            message: message.into(),
        }
    }
}
