//! # Fanout WS
//!
//! Axum WebSocket transport adapter for the fanout push core.
//!
//! This crate owns the transport handshake: an inbound connection presents
//! its channel identifier as a path segment, and the hub either admits it or
//! refuses it with a policy-violation close. Everything else (scoped
//! registration, user targeting, delivery, retry) lives in `fanout-core`.
//!
//! ## Routes
//!
//! - `GET /ws/{channel_id}` - WebSocket upgrade for one channel id
//! - `GET /api/push/stats` - hub statistics as JSON
//!
//! ## Example
//!
//! ```rust,no_run
//! use fanout_core::PushContext;
//! use fanout_ws::push_routes;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let push = Arc::new(PushContext::new());
//!     let app = push_routes().with_state(push);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080")
//!         .await
//!         .unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fanout_core::{ChannelId, CloseCode, PushContext, REASON_UNKNOWN_CHANNEL};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

pub mod transport;

pub use transport::{WsCommand, WsTransport};

/// Create the push API routes.
pub fn push_routes() -> Router<Arc<PushContext>> {
    Router::new()
        .route("/ws/{channel_id}", get(ws_handler))
        .route("/api/push/stats", get(get_stats))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<String>,
    State(push): State<Arc<PushContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, push, channel_id))
}

/// Drive one accepted socket: admit it to the hub, pump queued writes out,
/// and unregister it when the client goes away.
async fn handle_socket(socket: WebSocket, push: Arc<PushContext>, raw_id: String) {
    let (mut sink, mut stream) = socket.split();

    let channel_id = match ChannelId::parse(&raw_id) {
        Ok(id) => id,
        Err(_) => {
            debug!(channel = %raw_id, "Malformed channel id in handshake");
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::PolicyViolation.code(),
                    reason: REASON_UNKNOWN_CHANNEL.into(),
                })))
                .await;
            return;
        }
    };

    let (ws_transport, mut commands) = WsTransport::new();

    // Writer task: drains hub writes into the socket sink.
    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                WsCommand::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                WsCommand::Close(code, reason) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: code.code(),
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let conn = match push.hub().accept(channel_id, Box::new(ws_transport)) {
        Ok(conn) => conn,
        Err(err) => {
            debug!(error = %err, "Connection refused");
            // The refusal queued a close frame; let the writer flush it.
            let _ = writer.await;
            return;
        }
    };
    info!(connection = %conn.id, channel = %conn.channel_id(), "WebSocket client connected");

    // This is a push channel: inbound frames other than close/ping are
    // ignored.
    let mut close_code = CloseCode::Abnormal;
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(frame)) => {
                close_code = frame
                    .map(|f| CloseCode::from_u16(f.code))
                    .unwrap_or(CloseCode::Normal);
                debug!(connection = %conn.id, "WebSocket close received");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => {
                debug!(connection = %conn.id, "Inbound frame ignored");
            }
            Err(err) => {
                debug!(connection = %conn.id, error = %err, "WebSocket error");
                break;
            }
        }
    }

    push.hub().close(&conn, close_code);
    writer.abort();
    info!(connection = %conn.id, "WebSocket client disconnected");
}

/// Hub statistics endpoint.
async fn get_stats(State(push): State<Arc<PushContext>>) -> impl IntoResponse {
    Json(push.hub().stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_construct() {
        let push = Arc::new(PushContext::new());
        let _app: Router = push_routes().with_state(push);
    }
}
