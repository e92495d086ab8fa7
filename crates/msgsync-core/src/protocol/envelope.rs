//! Request/response envelopes for the discovery and messaging protocols.
//!
//! Wire format is one JSON object per line. Optional fields are omitted when
//! absent and decode to `None` when missing:
//!
//! ```text
//! {"command":"hello","peer_id":"alice"}
//! {"command":"new_message","peer_id":"alice","message_id":1700000000000,"message":"hi"}
//! {"status":"ok","messages":{"1700000000000":{"peer_id":"alice","message":"hi"}}}
//! {"status":"error","message":"Missing peer_id"}
//! ```

use super::command::{Command, Status};
use super::CodecError;
use crate::message::{Message, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A request sent by a discovery prober (UDP) or a sync client (TCP).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Request {
    /// `HELLO` from the given peer.
    pub fn hello(peer_id: &str) -> Self {
        Self {
            command: Some(Command::Hello),
            peer_id: Some(peer_id.to_string()),
            ..Default::default()
        }
    }

    /// `NEW_MESSAGE` pushing one message, sent on behalf of `peer_id`.
    pub fn new_message(peer_id: &str, message_id: MessageId, message: &str) -> Self {
        Self {
            command: Some(Command::NewMessage),
            peer_id: Some(peer_id.to_string()),
            message_id: Some(message_id),
            message: Some(message.to_string()),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Request serialization should not fail")
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Request serialization should not fail")
    }

    /// Parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// A response from a discovery responder (UDP) or messaging responder (TCP).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<BTreeMap<MessageId, Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

impl Response {
    /// Plain acknowledgement.
    pub fn ok() -> Self {
        Self {
            status: Some(Status::Ok),
            ..Default::default()
        }
    }

    /// Acknowledgement carrying the responder's history.
    pub fn with_messages(messages: BTreeMap<MessageId, Message>) -> Self {
        Self {
            status: Some(Status::Ok),
            messages: Some(messages),
            ..Default::default()
        }
    }

    /// Discovery answer identifying the responder.
    pub fn identity(peer_id: &str) -> Self {
        Self {
            status: Some(Status::Ok),
            peer_id: Some(peer_id.to_string()),
            ..Default::default()
        }
    }

    /// Error with a human-readable description.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Error),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Whether the status is `ok`.
    pub fn is_ok(&self) -> bool {
        self.status.as_ref().is_some_and(Status::is_ok)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Response serialization should not fail")
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Response serialization should not fail")
    }

    /// Parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}
