//! Server side of the messaging exchange, one `Session` per connection.
//!
//! The exchange is a two-state machine driven by newline-delimited requests:
//!
//! 1. `ExpectHello`: the client introduces itself and receives our whole
//!    history in the reply.
//! 2. `ExpectNewMessage`: the client pushes any number of messages, one per
//!    request, each acknowledged with `ok`.
//!
//! Anything out of order is a [`ProtocolError`]; the transport answers it
//! with an `error` response and closes the connection.

use crate::protocol::{Command, Request, Response};
use crate::store::MessageStore;
use thiserror::Error;
use tracing::debug;

/// Protocol violations. The display text is what the peer receives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid request {raw}: {reason}")]
    Malformed { raw: String, reason: String },
    #[error("Missing command in the request {0}")]
    MissingCommand(String),
    #[error("Expected command '{expected}' but received '{received}'")]
    UnexpectedCommand { expected: Command, received: Command },
    #[error("Missing peer_id in request {0}")]
    MissingPeerId(String),
}

/// Which request the session accepts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ExpectHello,
    ExpectNewMessage,
}

impl SessionState {
    fn expected_command(self) -> Command {
        match self {
            Self::ExpectHello => Command::Hello,
            Self::ExpectNewMessage => Command::NewMessage,
        }
    }
}

/// State of one inbound messaging connection.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    /// Peer id from the HELLO, once received
    remote_peer_id: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::ExpectHello,
            remote_peer_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_peer_id(&self) -> Option<&str> {
        self.remote_peer_id.as_deref()
    }

    /// Process one request line against the store.
    ///
    /// On error the session must be closed; its state is left unchanged.
    pub fn handle(&mut self, line: &str, store: &MessageStore) -> Result<Response, ProtocolError> {
        let request = Request::from_json(line.as_bytes()).map_err(|e| ProtocolError::Malformed {
            raw: line.to_string(),
            reason: e.to_string(),
        })?;

        let command = request
            .command
            .clone()
            .ok_or_else(|| ProtocolError::MissingCommand(line.to_string()))?;

        let expected = self.state.expected_command();
        if command != expected {
            return Err(ProtocolError::UnexpectedCommand {
                expected,
                received: command,
            });
        }

        let peer_id = request
            .peer_id
            .as_deref()
            .ok_or_else(|| ProtocolError::MissingPeerId(line.to_string()))?;

        match self.state {
            SessionState::ExpectHello => {
                debug!("HELLO from {}", peer_id);
                self.remote_peer_id = Some(peer_id.to_string());
                self.state = SessionState::ExpectNewMessage;
                Ok(Response::with_messages(store.get_messages()))
            }
            SessionState::ExpectNewMessage => {
                let content = request.message.as_deref().unwrap_or_default();
                match request.message_id {
                    Some(id) => store.stage_message(id, peer_id, content),
                    None => {
                        store.add_new_message(peer_id, content);
                    }
                }
                Ok(Response::ok())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn store() -> MessageStore {
        MessageStore::new(100)
    }

    fn hello(peer_id: &str) -> String {
        Request::hello(peer_id).to_line()
    }

    // ==================== HELLO ====================

    #[test]
    fn test_hello_returns_history_and_advances() {
        let store = store();
        store.add_message(7, "carol", "old news");
        let mut session = Session::new();

        let resp = session.handle(&hello("alice"), &store).unwrap();

        assert!(resp.is_ok());
        let messages = resp.messages.unwrap();
        assert_eq!(messages[&7], Message::new("carol", "old news"));
        assert_eq!(session.state(), SessionState::ExpectNewMessage);
        assert_eq!(session.remote_peer_id(), Some("alice"));
    }

    #[test]
    fn test_hello_on_empty_store_sends_empty_map() {
        let mut session = Session::new();
        let resp = session.handle(&hello("alice"), &store()).unwrap();
        assert_eq!(resp.to_line(), r#"{"status":"ok","messages":{}}"#);
    }

    #[test]
    fn test_hello_without_peer_id() {
        let mut session = Session::new();
        let line = r#"{"command":"hello"}"#;
        let err = session.handle(line, &store()).unwrap_err();

        assert_eq!(err, ProtocolError::MissingPeerId(line.to_string()));
        assert_eq!(session.state(), SessionState::ExpectHello);
    }

    #[test]
    fn test_second_hello_is_rejected() {
        let store = store();
        let mut session = Session::new();
        session.handle(&hello("alice"), &store).unwrap();

        let err = session.handle(&hello("alice"), &store).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected command 'new_message' but received 'hello'"
        );
    }

    // ==================== NEW_MESSAGE ====================

    #[test]
    fn test_new_message_before_hello_is_rejected() {
        let store = store();
        let mut session = Session::new();
        let line = Request::new_message("alice", 1, "hi").to_line();

        let err = session.handle(&line, &store).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected command 'hello' but received 'new_message'"
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_new_message_keeps_pushed_id_and_stages() {
        let store = store();
        let mut session = Session::new();
        session.handle(&hello("alice"), &store).unwrap();

        let line = Request::new_message("alice", 1234, "hi").to_line();
        let resp = session.handle(&line, &store).unwrap();

        assert_eq!(resp, Response::ok());
        assert_eq!(store.get_messages()[&1234], Message::new("alice", "hi"));
        assert!(store.get_pending_messages().contains_key(&1234));
    }

    #[test]
    fn test_new_message_without_id_gets_fresh_one() {
        let store = store();
        let mut session = Session::new();
        session.handle(&hello("alice"), &store).unwrap();

        let line = r#"{"command":"new_message","peer_id":"alice","message":"hi"}"#;
        session.handle(line, &store).unwrap();

        let messages = store.get_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages.values().next(), Some(&Message::new("alice", "hi")));
    }

    #[test]
    fn test_many_new_messages_in_one_session() {
        let store = store();
        let mut session = Session::new();
        session.handle(&hello("alice"), &store).unwrap();

        for id in 1..=3 {
            let line = Request::new_message("alice", id, "m").to_line();
            assert!(session.handle(&line, &store).unwrap().is_ok());
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_new_message_without_peer_id() {
        let store = store();
        let mut session = Session::new();
        session.handle(&hello("alice"), &store).unwrap();

        let line = r#"{"command":"new_message","message_id":1,"message":"hi"}"#;
        let err = session.handle(line, &store).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingPeerId(_)));
        assert!(store.is_empty());
    }

    // ==================== Malformed ====================

    #[test]
    fn test_garbage_is_malformed() {
        let err = Session::new().handle("hello there", &store()).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
        assert!(err.to_string().starts_with("Invalid request hello there"));
    }

    #[test]
    fn test_missing_command() {
        let line = r#"{"peer_id":"alice"}"#;
        let err = Session::new().handle(line, &store()).unwrap_err();
        assert_eq!(err, ProtocolError::MissingCommand(line.to_string()));
    }

    #[test]
    fn test_unknown_command() {
        let line = r#"{"command":"goodbye","peer_id":"alice"}"#;
        let err = Session::new().handle(line, &store()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected command 'hello' but received 'goodbye'"
        );
    }
}
