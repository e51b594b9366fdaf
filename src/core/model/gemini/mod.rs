//! Gemini Live (`BidiGenerateContent`) connector.
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! - Protocol: WebSocket with JSON messages (server messages may arrive as binary frames)
//! - Audio in: PCM16 LE mono 16 kHz, base64 in `realtimeInput.audio`
//! - Audio out: PCM16 LE mono 24 kHz, base64 in `serverContent.modelTurn.parts[].inlineData`

mod config;
mod connector;
pub mod messages;

pub use config::{
    DEFAULT_GEMINI_MODEL, DEFAULT_OUTPUT_SAMPLE_RATE, DEFAULT_SYSTEM_INSTRUCTION, GEMINI_LIVE_URL,
    GeminiLiveConfig,
};
pub use connector::GeminiLiveConnector;
pub use messages::FunctionDeclaration;
