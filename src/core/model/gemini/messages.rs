//! Gemini Live `BidiGenerateContent` WebSocket message types.
//!
//! Client messages (sent to server):
//! - setup - Model, generation config, system instruction and tools
//! - realtimeInput - Streaming audio chunk
//! - toolResponse - Results of function calls
//!
//! Server messages (received from server, text or binary frames):
//! - setupComplete - Setup acknowledged
//! - serverContent - Model turn parts, interrupted / turnComplete flags
//! - toolCall - Function calls requested by the model
//! - toolCallCancellation - Previously issued calls to disregard
//! - goAway - Server will disconnect soon

use std::collections::HashMap;

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::config::DEFAULT_OUTPUT_SAMPLE_RATE;
use crate::core::codec::rate_from_mime;
use crate::core::model::{ModelEvent, ToolCallEvent};

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent to Gemini Live.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage),
}

impl ClientMessage {
    /// Stream a chunk of PCM16 audio.
    pub fn audio(pcm: &[u8], mime_type: &str) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: mime_type.to_string(),
                data: BASE64_STANDARD.encode(pcm),
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// OpenAPI-style schema of the arguments
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: serde_json::Value,
}

// =============================================================================
// Shared Types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload with its mime type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// =============================================================================
// Server Messages
// =============================================================================

/// A message from Gemini Live. Exactly one field is normally set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallMessage>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub interrupted: bool,
    pub turn_complete: bool,
    pub generation_complete: bool,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCallMessage {
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    pub args: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolCallCancellation {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Translate into session events, in protocol order.
    pub fn into_events(self, call_id: &str) -> Vec<ModelEvent> {
        let mut events = Vec::new();

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        events.push(audio_event(blob));
                    }
                    if let Some(text) = part.text
                        && !text.is_empty()
                    {
                        events.push(ModelEvent::Text(text));
                    }
                }
            }
            if let Some(transcription) = content.output_transcription
                && !transcription.text.is_empty()
            {
                events.push(ModelEvent::Text(transcription.text));
            }
            if content.interrupted {
                events.push(ModelEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ModelEvent::TurnComplete);
            }
        }

        if let Some(tool_call) = self.tool_call {
            for call in tool_call.function_calls {
                events.push(ModelEvent::ToolCall(ToolCallEvent {
                    invocation_id: call.id.unwrap_or_default(),
                    name: call.name,
                    arguments: flatten_args(call.args),
                    call_id: call_id.to_string(),
                }));
            }
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(ModelEvent::ToolCallCancelled(cancellation.ids));
        }

        if let Some(go_away) = self.go_away {
            events.push(ModelEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}

fn audio_event(blob: Blob) -> ModelEvent {
    if !blob.mime_type.starts_with("audio/") {
        return ModelEvent::Malformed(format!("Unexpected inline data type {}", blob.mime_type));
    }
    match BASE64_STANDARD.decode(&blob.data) {
        Ok(data) => ModelEvent::Audio {
            data: Bytes::from(data),
            sample_rate: rate_from_mime(&blob.mime_type).unwrap_or(DEFAULT_OUTPUT_SAMPLE_RATE),
        },
        Err(e) => ModelEvent::Malformed(format!("Failed to decode audio: {}", e)),
    }
}

/// String arguments are kept as-is; other JSON values keep their JSON text.
fn flatten_args(args: Option<serde_json::Map<String, serde_json::Value>>) -> HashMap<String, String> {
    args.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect()
}
