//! Gemini Live transport.
//!
//! Opens the WebSocket, sends `setup`, waits for `setupComplete`, then spawns
//! a task that multiplexes caller audio, commands and server messages over the
//! socket until either side closes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::config::GeminiLiveConfig;
use super::messages::{
    ClientMessage, Content, FunctionResponse, GenerationConfig, PrebuiltVoiceConfig,
    ServerMessage, Setup, SpeechConfig, Tool, ToolResponseMessage, VoiceConfig,
};
use crate::core::model::{
    ModelCommand, ModelConnector, ModelError, ModelEvent, ModelLink, ModelSession, ToolResponse,
};
use crate::core::queue::DropOldestQueue;

/// Capacity of the command channel into the transport task.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the event channel out of the transport task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

pub struct GeminiLiveConnector {
    config: GeminiLiveConfig,
}

impl Drop for GeminiLiveConnector {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.config.api_key.zeroize();
    }
}

impl GeminiLiveConnector {
    pub fn new(config: GeminiLiveConfig) -> Result<Self, ModelError> {
        if config.api_key.is_empty() {
            return Err(ModelError::InvalidConfiguration(
                "Gemini API key is required".to_string(),
            ));
        }
        config.websocket_url()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GeminiLiveConfig {
        &self.config
    }

    /// Initial `setup` message for a session.
    pub fn setup_message(&self) -> ClientMessage {
        let speech_config = self.config.voice.as_ref().map(|voice| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.clone(),
                },
            },
        });

        let system_instruction = if self.config.system_instruction.is_empty() {
            None
        } else {
            Some(Content::text(self.config.system_instruction.clone()))
        };

        let tools = if self.config.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: self.config.tools.clone(),
            }]
        };

        ClientMessage::Setup(Setup {
            model: self.config.model_path(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config,
            },
            system_instruction,
            tools,
        })
    }

    async fn handshake(&self, sink: &mut WsSink, stream: &mut WsSource) -> Result<(), ModelError> {
        let setup = serde_json::to_string(&self.setup_message())
            .map_err(|e| ModelError::InvalidConfiguration(e.to_string()))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| ModelError::ConnectionFailed(e.to_string()))?;

        while let Some(message) = stream.next().await {
            let parsed = match message {
                Ok(Message::Text(text)) => serde_json::from_str::<ServerMessage>(text.as_str()),
                Ok(Message::Binary(data)) => serde_json::from_slice::<ServerMessage>(&data),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed without reason".to_string());
                    return Err(ModelError::SetupRejected(reason));
                }
                Ok(_) => continue,
                Err(e) => return Err(ModelError::ConnectionFailed(e.to_string())),
            };

            match parsed {
                Ok(message) if message.is_setup_complete() => return Ok(()),
                Ok(_) => tracing::debug!("Ignoring message received before setupComplete"),
                Err(e) => tracing::warn!("Failed to parse setup response: {}", e),
            }
        }

        Err(ModelError::ConnectionFailed(
            "stream ended during setup".to_string(),
        ))
    }
}

#[async_trait]
impl ModelConnector for GeminiLiveConnector {
    fn name(&self) -> &'static str {
        "gemini-live"
    }

    async fn connect(
        &self,
        session: &ModelSession,
        audio: Arc<DropOldestQueue<Bytes>>,
    ) -> Result<ModelLink, ModelError> {
        let url = self.config.websocket_url()?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ModelError::ConnectionFailed(e.to_string()))?;

        let (mut sink, mut stream) = ws_stream.split();
        self.handshake(&mut sink, &mut stream).await?;

        tracing::info!(
            call_id = %session.call_id,
            model = %self.config.model,
            "Connected to Gemini Live"
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (evt_tx, evt_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let task = tokio::spawn(run_transport(
            sink,
            stream,
            cmd_rx,
            evt_tx,
            audio,
            session.call_id.clone(),
            self.config.input_mime_type(),
        ));

        Ok(ModelLink {
            commands: cmd_tx,
            events: evt_rx,
            task,
        })
    }
}

fn tool_response_message(response: ToolResponse) -> ClientMessage {
    ClientMessage::ToolResponse(ToolResponseMessage {
        function_responses: vec![FunctionResponse {
            id: response.invocation_id,
            name: response.name,
            response: response.response,
        }],
    })
}

async fn send_json(sink: &mut WsSink, message: &ClientMessage) -> Result<(), String> {
    let json = serde_json::to_string(message).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Forward decoded server events. Returns false once the receiver is gone.
async fn forward(events: &mpsc::Sender<ModelEvent>, payload: &[u8], call_id: &str) -> bool {
    match serde_json::from_slice::<ServerMessage>(payload) {
        Ok(message) => {
            for event in message.into_events(call_id) {
                if events.send(event).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => events
            .send(ModelEvent::Malformed(format!("Failed to parse server message: {}", e)))
            .await
            .is_ok(),
    }
}

async fn run_transport(
    mut sink: WsSink,
    mut stream: WsSource,
    mut commands: mpsc::Receiver<ModelCommand>,
    events: mpsc::Sender<ModelEvent>,
    audio: Arc<DropOldestQueue<Bytes>>,
    call_id: String,
    input_mime: String,
) {
    let mut audio_open = true;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(ModelCommand::ToolResponse(response)) => {
                    if let Err(e) = send_json(&mut sink, &tool_response_message(response)).await {
                        let _ = events.send(ModelEvent::Error(e)).await;
                        break;
                    }
                }
                Some(ModelCommand::CancelGeneration) => {
                    tracing::debug!(call_id = %call_id, "Gemini Live has no explicit cancel; relying on local discard");
                }
                Some(ModelCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },

            pcm = audio.recv(), if audio_open => match pcm {
                Some(pcm) => {
                    if let Err(e) = send_json(&mut sink, &ClientMessage::audio(&pcm, &input_mime)).await {
                        let _ = events.send(ModelEvent::Error(e)).await;
                        break;
                    }
                }
                None => audio_open = false,
            },

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !forward(&events, text.as_bytes(), &call_id).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if !forward(&events, &data, &call_id).await {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        tracing::warn!(call_id = %call_id, "Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                    tracing::info!(call_id = %call_id, ?reason, "Gemini Live closed the stream");
                    let _ = events.send(ModelEvent::Closed { reason }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(call_id = %call_id, "Gemini Live WebSocket error: {}", e);
                    let _ = events.send(ModelEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = events.send(ModelEvent::Closed { reason: None }).await;
                    break;
                }
            },
        }
    }

    tracing::debug!(call_id = %call_id, "Gemini Live transport task finished");
}
