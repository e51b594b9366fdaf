//! Gemini Live connection settings.

use url::Url;

use super::messages::FunctionDeclaration;
use crate::core::codec::MODEL_INPUT_SAMPLE_RATE;
use crate::core::model::ModelError;

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default system instruction for the support assistant.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful customer support AI. Keep your answers brief and conversational. \
If the user asks to speak to a human, a manager, or seems highly frustrated, \
you MUST immediately use the 'transfer_to_human' tool.";

/// Audio sample rate assumed when the model omits it from the mime type.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Clone)]
pub struct GeminiLiveConfig {
    pub api_key: String,
    /// Model name, with or without the `models/` prefix.
    pub model: String,
    /// WebSocket endpoint (overridable for tests and proxies).
    pub endpoint: String,
    pub system_instruction: String,
    /// Prebuilt voice name (e.g. "Puck"); provider default when unset.
    pub voice: Option<String>,
    pub tools: Vec<FunctionDeclaration>,
    pub input_sample_rate: u32,
}

impl Default for GeminiLiveConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoint: GEMINI_LIVE_URL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: None,
            tools: Vec::new(),
            input_sample_rate: MODEL_INPUT_SAMPLE_RATE,
        }
    }
}

impl GeminiLiveConfig {
    /// Fully qualified model resource name.
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Endpoint URL including the API key.
    pub fn websocket_url(&self) -> Result<String, ModelError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            ModelError::InvalidConfiguration(format!("Invalid Gemini endpoint: {e}"))
        })?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url.into())
    }

    /// Mime type for caller audio sent to the model.
    pub fn input_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}
