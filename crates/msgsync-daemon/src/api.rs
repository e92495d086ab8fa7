//! Local HTTP API for reading the history and posting messages.
//!
//! - `GET /messages`: the whole history as `{"messages": {...}}`
//! - `GET /send?message=<text>`: store a new message authored by this node

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use msgsync_core::{MessageId, MessageStore, Response, Status};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Shared state for the API handlers.
pub struct ApiState {
    pub peer_id: String,
    pub store: Arc<MessageStore>,
}

#[derive(Debug, Deserialize)]
pub struct SendQuery {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendReply {
    pub status: Status,
    pub message_id: MessageId,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/messages", get(messages_handler))
        .route("/send", get(send_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /messages
async fn messages_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(Response {
        messages: Some(state.store.get_messages()),
        ..Response::default()
    })
}

/// GET /send
async fn send_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SendQuery>,
) -> impl IntoResponse {
    let message = query.message.unwrap_or_default();
    if message.is_empty() {
        return (StatusCode::BAD_REQUEST, "Message is empty").into_response();
    }

    let message_id = state
        .store
        .add_new_message(&state.peer_id, &html_escape(&message));
    tracing::info!("Accepted local message {}", message_id);

    Json(SendReply {
        status: Status::Ok,
        message_id,
    })
    .into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
