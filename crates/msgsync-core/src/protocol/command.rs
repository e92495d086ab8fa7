//! Command and status discriminators.
//!
//! Both are plain strings on the wire. Values we don't recognize are kept
//! verbatim in an `Unknown` variant instead of failing the whole decode, so
//! the session layer can answer with a proper protocol error.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Request command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    /// Handshake: discovery probe over UDP, session opener over TCP
    Hello,
    /// Push a single message to the peer
    NewMessage,
    /// Anything else, kept as received
    Unknown(String),
}

impl Command {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::NewMessage => "new_message",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        match value.as_str() {
            "hello" => Self::Hello,
            "new_message" => Self::NewMessage,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        match command {
            Command::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Ok,
    Error,
    Unknown(String),
}

impl Status {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ok" => Self::Ok,
            "error" => Self::Error,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
