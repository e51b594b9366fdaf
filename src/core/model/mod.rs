//! Streaming connection to the multimodal model.
//!
//! A [`ModelConnector`] opens one bidirectional stream per call and hands back
//! a [`ModelLink`]: a command channel, an event channel and the transport task
//! that owns the socket. [`ModelStreamClient`] sits on top of the link and
//! adds the session policy: connect timeout, bounded retries, reconnects,
//! the stream error budget and event dispatch.

pub mod client;
pub mod gemini;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::queue::DropOldestQueue;

pub use client::{ModelClientConfig, ModelStreamClient};
pub use gemini::{GeminiLiveConfig, GeminiLiveConnector};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Model connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Model handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Model rejected session setup: {0}")]
    SetupRejected(String),

    #[error("Too many model stream errors ({count}, threshold {threshold})")]
    StreamErrors { count: u64, threshold: u64 },

    #[error("Model stream is closed")]
    Closed,

    #[error("Invalid model configuration: {0}")]
    InvalidConfiguration(String),
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEvent {
    /// Model-side invocation id, echoed back in the tool response.
    pub invocation_id: String,
    pub name: String,
    pub arguments: HashMap<String, String>,
    /// Telephony call the session belongs to.
    pub call_id: String,
}

/// Answer to a [`ToolCallEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub invocation_id: String,
    pub name: String,
    pub response: serde_json::Value,
}

/// Events produced by a model link.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Raw PCM16 LE audio.
    Audio { data: Bytes, sample_rate: u32 },
    /// Text or transcript produced by the model.
    Text(String),
    ToolCall(ToolCallEvent),
    ToolCallCancelled(Vec<String>),
    /// The model stopped generating because the caller interrupted.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// The server announced it will close the stream soon.
    GoAway { time_left: Option<String> },
    /// An event that could not be decoded.
    Malformed(String),
    /// The server closed the stream.
    Closed { reason: Option<String> },
    /// Transport failure; the link is gone.
    Error(String),
}

/// Commands accepted by a model link.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelCommand {
    CancelGeneration,
    ToolResponse(ToolResponse),
    Close,
}

/// Identity of the session a link is opened for.
#[derive(Debug, Clone)]
pub struct ModelSession {
    pub call_id: String,
}

/// One open model stream.
pub struct ModelLink {
    pub commands: mpsc::Sender<ModelCommand>,
    pub events: mpsc::Receiver<ModelEvent>,
    pub task: JoinHandle<()>,
}

/// Opens model streams.
///
/// `connect` must send the session setup and return only once the model has
/// acknowledged it. The link's transport task drains `audio` for as long as it
/// runs; the queue outlives any single link so audio survives reconnects.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the protocol can cancel an in-progress generation.
    fn supports_cancel(&self) -> bool {
        false
    }

    async fn connect(
        &self,
        session: &ModelSession,
        audio: Arc<DropOldestQueue<Bytes>>,
    ) -> Result<ModelLink, ModelError>;
}

/// Receiver side of [`ModelStreamClient::on_event`] dispatch.
#[async_trait]
pub trait ModelEventHandler: Send + Sync {
    /// Assistant audio (PCM16 LE).
    fn on_audio(&self, data: Bytes, sample_rate: u32);

    /// A tool call. The returned response, if any, is sent back to the model.
    async fn on_tool_call(&self, call: ToolCallEvent) -> Option<ToolResponse>;

    /// The model finished or abandoned a generation.
    fn on_generation_boundary(&self, interrupted: bool);

    /// A replacement link is ready after the previous one was lost.
    fn on_link_reset(&self);
}
