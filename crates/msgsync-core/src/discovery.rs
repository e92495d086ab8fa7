//! Discovery handshake decisions, independent of sockets.
//!
//! A prober broadcasts `{"command":"hello","peer_id":<self>}`; every responder
//! on the subnet answers with its own id. Both sides ignore their own echo.

use crate::protocol::{CodecError, Command, Request, Response};
use tracing::debug;

/// Strip the zero padding left in a fixed-size datagram buffer.
pub fn trim_datagram(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}

/// Decide the responder's answer to one discovery datagram.
///
/// Returns `None` when no reply should be sent: the datagram is not a
/// `HELLO`, or it is our own broadcast coming back.
pub fn hello_reply(own_peer_id: &str, datagram: &[u8]) -> Result<Option<Response>, CodecError> {
    let raw = trim_datagram(datagram);
    let request = Request::from_json(raw)?;

    if request.command != Some(Command::Hello) {
        debug!("Ignoring non-hello discovery request");
        return Ok(None);
    }

    match request.peer_id.as_deref() {
        Some(peer_id) if peer_id == own_peer_id => Ok(None),
        Some(_) => Ok(Some(Response::identity(own_peer_id))),
        None => Ok(Some(Response::error(format!(
            "Missing peer_id: {}",
            String::from_utf8_lossy(raw)
        )))),
    }
}

/// What a prober learned from one discovery reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    /// A remote peer announced itself
    Discovered(String),
    /// Our own answer
    OwnEcho,
    /// The responder reported an error and no identity
    Rejected(String),
    /// Not a usable reply
    Unparseable,
}

/// Classify a discovery reply received by a prober.
pub fn classify_reply(own_peer_id: &str, datagram: &[u8]) -> ProbeReply {
    let Ok(response) = Response::from_json(trim_datagram(datagram)) else {
        return ProbeReply::Unparseable;
    };

    match response.peer_id {
        Some(peer_id) if peer_id == own_peer_id => ProbeReply::OwnEcho,
        Some(peer_id) => ProbeReply::Discovered(peer_id),
        None => match response.message {
            Some(message) => ProbeReply::Rejected(message),
            None => ProbeReply::Unparseable,
        },
    }
}
