//! Wire protocol shared by discovery (UDP) and messaging (TCP).
//!
//! - Command/status discriminators with an explicit unknown fallback
//! - Request/response envelopes, one JSON object per line
//! - Frame limits

pub mod command;
pub mod envelope;

pub use command::{Command, Status};
pub use envelope::{Request, Response};

use thiserror::Error;

/// Maximum length of one newline-delimited frame on a messaging connection.
///
/// A full history response is the largest frame; this leaves room for a few
/// thousand long messages while still bounding memory per connection.
pub const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Errors raised while decoding a frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}
