//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and active session listing
//! - `media_stream` - Twilio Media Streams WebSocket endpoint

pub mod api;
pub mod media_stream;

pub use media_stream::media_stream_handler;
