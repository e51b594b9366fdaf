//! Twilio Media Streams WebSocket handler
//!
//! Twilio opens one socket per call after the TwiML `<Connect><Stream>` verb.
//! The socket carries JSON text frames: `connected`, `start`, then `media`,
//! `mark` and `dtmf` until `stop`. Everything after the upgrade is handed to
//! the [`TelephonyStreamBridge`](crate::core::telephony::TelephonyStreamBridge).

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::state::AppState;

/// Twilio media frames are small; cap anything unexpected.
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Upgrade the connection and relay the call until it ends.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    info!(%peer, "Media stream connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state, peer))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    let (sender, receiver) = socket.split();

    match state.bridge.run_media_session(sender, receiver).await {
        Ok(()) => debug!(%peer, "Media stream closed"),
        Err(e) => info!(%peer, "Media stream rejected: {}", e),
    }
}
