//! Session-level policy on top of a [`ModelConnector`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    ModelCommand, ModelConnector, ModelError, ModelEvent, ModelEventHandler, ModelLink,
    ModelSession, ToolResponse,
};
use crate::core::queue::{DropOldestQueue, PushOutcome};
use crate::core::retry::RetryPolicy;
use crate::core::session::SessionMetrics;

/// How long `close` waits for the transport task before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    /// Upper bound for opening the stream and completing setup.
    pub connect_timeout: Duration,
    /// Retries for the initial connect and for reconnects.
    pub retry: RetryPolicy,
    /// Malformed or errored events tolerated before the session is failed.
    pub stream_error_threshold: u64,
    /// Caller audio chunks buffered while the link is busy.
    pub send_queue_capacity: usize,
}

impl Default for ModelClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            stream_error_threshold: 5,
            send_queue_capacity: 50,
        }
    }
}

/// Model stream for one call.
///
/// Shared between the inbound pump (which calls [`send_audio`](Self::send_audio)
/// and [`cancel_generation`](Self::cancel_generation)) and the model receive
/// loop (which calls [`run`](Self::run)).
pub struct ModelStreamClient {
    connector: Arc<dyn ModelConnector>,
    config: ModelClientConfig,
    session: ModelSession,
    audio: Arc<DropOldestQueue<Bytes>>,
    metrics: Arc<SessionMetrics>,
    commands: parking_lot::Mutex<Option<mpsc::Sender<ModelCommand>>>,
    events: tokio::sync::Mutex<Option<mpsc::Receiver<ModelEvent>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
}

impl ModelStreamClient {
    pub fn new(
        connector: Arc<dyn ModelConnector>,
        config: ModelClientConfig,
        call_id: impl Into<String>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let audio = Arc::new(DropOldestQueue::new(config.send_queue_capacity));
        Self {
            connector,
            config,
            session: ModelSession {
                call_id: call_id.into(),
            },
            audio,
            metrics,
            commands: parking_lot::Mutex::new(None),
            events: tokio::sync::Mutex::new(None),
            task: parking_lot::Mutex::new(None),
            closing: AtomicBool::new(false),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.session.call_id
    }

    /// Open the stream and complete setup, retrying with backoff.
    pub async fn start(&self) -> Result<(), ModelError> {
        let this = self;
        let result = self
            .config
            .retry
            .run("model_connect", move |attempt| async move {
                tracing::debug!(
                    call_id = %this.session.call_id,
                    provider = this.connector.name(),
                    attempt,
                    "Connecting to model"
                );
                match tokio::time::timeout(
                    this.config.connect_timeout,
                    this.connector.connect(&this.session, this.audio.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::ConnectTimeout(this.config.connect_timeout)),
                }
            })
            .await;

        match result {
            Ok(link) => {
                self.install(link).await;
                tracing::info!(
                    call_id = %self.session.call_id,
                    provider = self.connector.name(),
                    "Model stream ready"
                );
                Ok(())
            }
            Err((e, attempts)) => {
                tracing::error!(
                    call_id = %self.session.call_id,
                    attempts,
                    "Model connection failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn install(&self, link: ModelLink) {
        *self.commands.lock() = Some(link.commands);
        *self.events.lock().await = Some(link.events);
        if let Some(old) = self.task.lock().replace(link.task) {
            old.abort();
        }
    }

    /// Queue caller audio (PCM16 LE at the model input rate) without blocking.
    ///
    /// When the queue is full the oldest unsent chunk is dropped and counted.
    pub fn send_audio(&self, pcm: Bytes) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }
        match self.audio.push(pcm) {
            PushOutcome::Queued => true,
            PushOutcome::DroppedOldest => {
                self.metrics.record_backpressure_drop();
                tracing::trace!(call_id = %self.session.call_id, "Model send queue full, dropped oldest chunk");
                true
            }
            PushOutcome::Closed => false,
        }
    }

    /// Ask the model to stop the current generation.
    ///
    /// Returns false when the protocol has no cancel; the session then relies
    /// on discarding stale audio locally.
    pub fn cancel_generation(&self) -> bool {
        if !self.connector.supports_cancel() {
            return false;
        }
        let sender = self.commands.lock().clone();
        match sender {
            Some(sender) => sender.try_send(ModelCommand::CancelGeneration).is_ok(),
            None => false,
        }
    }

    pub async fn send_tool_response(&self, response: ToolResponse) -> Result<(), ModelError> {
        let sender = self.commands.lock().clone().ok_or(ModelError::Closed)?;
        sender
            .send(ModelCommand::ToolResponse(response))
            .await
            .map_err(|_| ModelError::Closed)
    }

    /// Wait for the next event from the current link.
    pub async fn next_event(&self) -> Option<ModelEvent> {
        let mut events = self.events.lock().await;
        match events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Receive loop: dispatch events until cancelled or a fatal error occurs.
    pub async fn run(
        &self,
        handler: &dyn ModelEventHandler,
        cancel: CancellationToken,
    ) -> Result<(), ModelError> {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = self.next_event() => event,
            };

            let step = async {
                match event {
                    Some(event) => self.on_event(event, handler).await,
                    None if self.closing.load(Ordering::SeqCst) => Err(ModelError::Closed),
                    None => self.reconnect("event channel closed", handler).await,
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = step => result,
            };

            match result {
                Ok(()) => {}
                Err(ModelError::Closed) if self.closing.load(Ordering::SeqCst) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one event.
    pub async fn on_event(
        &self,
        event: ModelEvent,
        handler: &dyn ModelEventHandler,
    ) -> Result<(), ModelError> {
        let call_id = &self.session.call_id;
        match event {
            ModelEvent::Audio { data, sample_rate } => {
                self.metrics.record_frame_from_model();
                handler.on_audio(data, sample_rate);
            }
            ModelEvent::Text(text) => {
                tracing::info!(call_id = %call_id, "Assistant: {}", text);
            }
            ModelEvent::ToolCall(call) => {
                self.metrics.record_tool_call();
                tracing::info!(
                    call_id = %call_id,
                    tool = %call.name,
                    invocation_id = %call.invocation_id,
                    "Tool call received"
                );
                if let Some(response) = handler.on_tool_call(call).await
                    && let Err(e) = self.send_tool_response(response).await
                {
                    tracing::warn!(call_id = %call_id, "Failed to send tool response: {}", e);
                }
            }
            ModelEvent::ToolCallCancelled(ids) => {
                tracing::info!(call_id = %call_id, ?ids, "Model cancelled tool calls");
            }
            ModelEvent::Interrupted => {
                tracing::debug!(call_id = %call_id, "Model generation interrupted");
                handler.on_generation_boundary(true);
            }
            ModelEvent::TurnComplete => {
                handler.on_generation_boundary(false);
            }
            ModelEvent::GoAway { time_left } => {
                tracing::warn!(
                    call_id = %call_id,
                    time_left = time_left.as_deref().unwrap_or("unknown"),
                    "Model server is going away"
                );
            }
            ModelEvent::Malformed(detail) => {
                self.record_stream_error(&detail)?;
            }
            ModelEvent::Error(detail) => {
                self.record_stream_error(&detail)?;
                self.reconnect(&detail, handler).await?;
            }
            ModelEvent::Closed { reason } => {
                if self.closing.load(Ordering::SeqCst) {
                    return Err(ModelError::Closed);
                }
                let reason = reason.unwrap_or_else(|| "closed by server".to_string());
                self.reconnect(&reason, handler).await?;
            }
        }
        Ok(())
    }

    fn record_stream_error(&self, detail: &str) -> Result<(), ModelError> {
        let count = self.metrics.record_stream_error();
        let threshold = self.config.stream_error_threshold;
        tracing::warn!(
            call_id = %self.session.call_id,
            count,
            threshold,
            "Model stream error: {}",
            detail
        );
        if count > threshold {
            Err(ModelError::StreamErrors { count, threshold })
        } else {
            Ok(())
        }
    }

    /// Replace a lost link. A fresh link never continues the old generation,
    /// so the handler is told to forget it once the new link is ready.
    async fn reconnect(
        &self,
        cause: &str,
        handler: &dyn ModelEventHandler,
    ) -> Result<(), ModelError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ModelError::Closed);
        }
        tracing::warn!(call_id = %self.session.call_id, "Model stream lost ({}), reconnecting", cause);
        self.metrics.record_reconnect();

        *self.commands.lock() = None;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.start().await?;
        handler.on_link_reset();
        Ok(())
    }

    /// Close the stream. Safe to call more than once.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.audio.close();

        if let Some(sender) = self.commands.lock().take() {
            let _ = sender.try_send(ModelCommand::Close);
        }

        let task = self.task.lock().take();
        if let Some(mut task) = task
            && tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err()
        {
            task.abort();
        }
        tracing::debug!(call_id = %self.session.call_id, "Model stream closed");
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Chunks currently waiting to be sent.
    pub fn queued_audio(&self) -> usize {
        self.audio.len()
    }
}
