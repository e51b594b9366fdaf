//! Media stream route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the Twilio Media Streams router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for a Twilio `<Stream>`
///
/// Point the TwiML at it:
///
/// ```xml
/// <Response>
///   <Connect>
///     <Stream url="wss://your-host/media-stream" />
///   </Connect>
/// </Response>
/// ```
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
