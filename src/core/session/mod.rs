//! Per-call session: floor state, shared handle, registry and the glue that
//! routes audio and tool calls between telephony and the model.

mod duplex;
mod handle;
mod metrics;
mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

pub use duplex::{
    BargeIn, DropReason, DuplexConfig, DuplexSessionState, Floor, HandoffState, InboundDecision,
    OutboundAction, OutboundDecision,
};
pub use handle::{SessionHandle, SessionSummary};
pub use metrics::{SessionMetrics, SessionMetricsSnapshot};
pub use registry::{RegistryError, SessionRegistry};

use crate::core::codec::{AudioFrameCodec, FormatError};
use crate::core::handoff::HandoffController;
use crate::core::model::{ModelEventHandler, ModelStreamClient, ToolCallEvent, ToolResponse};
use crate::errors::EndReason;

/// Everything one call needs, shared by its tasks.
pub struct Session {
    handle: Arc<SessionHandle>,
    model: Arc<ModelStreamClient>,
    handoff: Arc<HandoffController>,
    registry: Arc<SessionRegistry>,
    codec: AudioFrameCodec,
    inbound_seq: AtomicU64,
    outbound_seq: AtomicU64,
}

impl Session {
    pub fn new(
        handle: Arc<SessionHandle>,
        model: Arc<ModelStreamClient>,
        handoff: Arc<HandoffController>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            handle,
            model,
            handoff,
            registry,
            codec: AudioFrameCodec::new(),
            inbound_seq: AtomicU64::new(0),
            outbound_seq: AtomicU64::new(0),
        }
    }

    pub fn call_id(&self) -> &str {
        self.handle.call_id()
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn state(&self) -> &Arc<DuplexSessionState> {
        self.handle.state()
    }

    pub fn model(&self) -> &Arc<ModelStreamClient> {
        &self.model
    }

    pub fn codec(&self) -> &AudioFrameCodec {
        &self.codec
    }

    /// Handle one telephony media payload.
    ///
    /// Malformed payloads are counted and dropped; they never end the session.
    pub fn on_caller_audio(&self, payload: &str) -> Result<InboundDecision, FormatError> {
        let metrics = self.handle.metrics();
        let sequence = self.inbound_seq.fetch_add(1, Ordering::Relaxed);

        let frame = match self.codec.decode_inbound(payload, sequence) {
            Ok(frame) => frame,
            Err(e) => {
                metrics.record_format_error();
                tracing::debug!(call_id = %self.call_id(), sequence, "Dropping caller frame: {}", e);
                return Err(e);
            }
        };
        metrics.record_frame_in();

        let decision = self.state().on_inbound_frame(&frame, Instant::now());

        if let Some(barge_in) = decision.barge_in {
            metrics.record_barge_in();
            metrics.record_dropped(barge_in.discarded as u64);
            let cancelled = barge_in.generation_active && self.model.cancel_generation();
            tracing::info!(
                call_id = %self.call_id(),
                discarded = barge_in.discarded,
                generation_active = barge_in.generation_active,
                cancelled,
                "Caller barged in"
            );
        }

        if decision.forward_to_model {
            match self.codec.to_model_input(&frame) {
                Ok(pcm) => {
                    if self.model.send_audio(pcm) {
                        metrics.record_frame_to_model();
                    }
                }
                Err(e) => {
                    metrics.record_format_error();
                    tracing::debug!(call_id = %self.call_id(), "Failed to convert caller frame: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(decision)
    }

    /// Stop the session and deregister it. Safe to call from any task.
    ///
    /// Deregisters before cancelling so nothing observes a closed socket for
    /// a call that is still listed.
    pub fn teardown(&self, reason: EndReason) -> bool {
        self.registry.remove_if_same(&self.handle);
        self.handle.teardown(reason)
    }
}

#[async_trait]
impl ModelEventHandler for Session {
    fn on_audio(&self, data: Bytes, sample_rate: u32) {
        let metrics = self.handle.metrics();
        let sequence = self.outbound_seq.fetch_add(1, Ordering::Relaxed);

        let frame = match self.codec.decode_model_audio(&data, sample_rate, sequence) {
            Ok(frame) => frame,
            Err(e) => {
                metrics.record_format_error();
                tracing::debug!(call_id = %self.call_id(), sequence, "Dropping model audio: {}", e);
                return;
            }
        };

        match self.state().on_outbound_frame(frame, Instant::now()) {
            OutboundDecision::Enqueued { evicted: false } => {}
            OutboundDecision::Enqueued { evicted: true } => {
                metrics.record_dropped(1);
                tracing::trace!(call_id = %self.call_id(), "Outbound queue full, evicted oldest frame");
            }
            OutboundDecision::Dropped(reason) => {
                metrics.record_dropped(1);
                tracing::trace!(call_id = %self.call_id(), ?reason, "Dropped assistant frame");
            }
        }
    }

    async fn on_tool_call(&self, call: ToolCallEvent) -> Option<ToolResponse> {
        let outcome = self.handoff.on_tool_call(&call, self.state()).await;
        let response = outcome.tool_response(&call);
        if !outcome.is_completed() {
            return response;
        }

        // Deliver the result before teardown cancels the receive loop.
        if let Some(response) = response
            && let Err(e) = self.model.send_tool_response(response).await
        {
            tracing::debug!(call_id = %self.call_id(), "Transfer result not delivered: {}", e);
        }
        self.teardown(EndReason::HandoffCompleted);
        None
    }

    fn on_generation_boundary(&self, interrupted: bool) {
        tracing::trace!(call_id = %self.call_id(), interrupted, "Generation boundary");
        self.state().on_generation_boundary(Instant::now());
    }

    fn on_link_reset(&self) {
        tracing::debug!(call_id = %self.call_id(), "Model link replaced, resetting generation");
        self.state().reset_generation(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handoff::{
        CallControl, ControlApiError, HandoffConfig, TRANSFER_TOOL_NAME, TransferInstruction,
    };
    use crate::core::model::{
        ModelClientConfig, ModelConnector, ModelError, ModelLink, ModelSession,
    };
    use crate::core::queue::DropOldestQueue;
    use crate::core::retry::RetryPolicy;
    use base64::prelude::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct IdleConnector;

    #[async_trait]
    impl ModelConnector for IdleConnector {
        fn name(&self) -> &'static str {
            "idle"
        }

        async fn connect(
            &self,
            _session: &ModelSession,
            _audio: Arc<DropOldestQueue<Bytes>>,
        ) -> Result<ModelLink, ModelError> {
            Err(ModelError::ConnectionFailed("not used".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingControl {
        redirects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CallControl for RecordingControl {
        async fn redirect(
            &self,
            _call_id: &str,
            instruction: &TransferInstruction,
        ) -> Result<(), ControlApiError> {
            self.redirects.lock().push(instruction.destination.clone());
            Ok(())
        }
    }

    fn session(control: Arc<RecordingControl>) -> (Session, Arc<SessionRegistry>) {
        let state = Arc::new(DuplexSessionState::new(
            DuplexConfig::default(),
            Instant::now(),
        ));
        let handle = Arc::new(SessionHandle::new("CA1", "MZ1", state));
        let registry = Arc::new(SessionRegistry::new());
        registry.insert(handle.clone()).unwrap();

        let model = Arc::new(ModelStreamClient::new(
            Arc::new(IdleConnector),
            ModelClientConfig::default(),
            "CA1",
            handle.metrics().clone(),
        ));
        let handoff = Arc::new(HandoffController::new(
            control,
            HandoffConfig {
                retry: RetryPolicy::no_retry(),
                ..Default::default()
            },
        ));

        (
            Session::new(handle, model, handoff, registry.clone()),
            registry,
        )
    }

    /// μ-law payload of a loud square wave (0x00 and 0x80 are the extremes).
    fn loud_payload() -> String {
        let ulaw: Vec<u8> = (0..160).map(|i| if i % 2 == 0 { 0x00 } else { 0x80 }).collect();
        BASE64_STANDARD.encode(ulaw)
    }

    /// μ-law payload of digital silence.
    fn silent_payload() -> String {
        BASE64_STANDARD.encode([0xFFu8; 160])
    }

    fn assistant_pcm(samples: usize) -> Bytes {
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let sample: i16 = if i % 2 == 0 { 8000 } else { -8000 };
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Bytes::from(out)
    }

    #[tokio::test]
    async fn test_caller_audio_takes_floor_and_reaches_model() {
        let (session, _) = session(Arc::new(RecordingControl::default()));

        let decision = session.on_caller_audio(&loud_payload()).unwrap();
        assert!(decision.forward_to_model);
        assert!(decision.voiced);
        assert_eq!(session.state().floor(), Floor::CallerSpeaking);
        assert_eq!(session.model().queued_audio(), 1);

        let metrics = session.handle().metrics().snapshot();
        assert_eq!(metrics.frames_in, 1);
        assert_eq!(metrics.frames_to_model, 1);
    }

    #[tokio::test]
    async fn test_silent_caller_audio_is_still_forwarded() {
        let (session, _) = session(Arc::new(RecordingControl::default()));

        let decision = session.on_caller_audio(&silent_payload()).unwrap();
        assert!(decision.forward_to_model);
        assert!(!decision.voiced);
        assert_eq!(session.state().floor(), Floor::Idle);
    }

    #[tokio::test]
    async fn test_malformed_payload_counted_and_dropped() {
        let (session, _) = session(Arc::new(RecordingControl::default()));

        assert!(session.on_caller_audio("***not base64***").is_err());
        assert!(session.on_caller_audio("").is_err());
        assert_eq!(session.handle().metrics().snapshot().format_errors, 2);
        assert_eq!(session.model().queued_audio(), 0);
    }

    #[tokio::test]
    async fn test_barge_in_discards_queued_assistant_audio() {
        let (session, _) = session(Arc::new(RecordingControl::default()));

        for _ in 0..3 {
            session.on_audio(assistant_pcm(480), 24000);
        }
        assert_eq!(session.state().floor(), Floor::AssistantSpeaking);
        assert_eq!(session.state().pending_len(), 3);

        let decision = session.on_caller_audio(&loud_payload()).unwrap();
        let barge_in = decision.barge_in.unwrap();
        assert_eq!(barge_in.discarded, 3);
        assert_eq!(session.state().floor(), Floor::CallerSpeaking);
        assert_eq!(session.state().pending_len(), 0);

        // Audio from the interrupted generation is dropped.
        session.on_audio(assistant_pcm(480), 24000);
        assert_eq!(session.state().pending_len(), 0);

        let metrics = session.handle().metrics().snapshot();
        assert_eq!(metrics.barge_ins, 1);
        assert_eq!(metrics.frames_dropped, 4);
    }

    #[tokio::test]
    async fn test_link_reset_ends_stale_discard() {
        let (session, _) = session(Arc::new(RecordingControl::default()));

        session.on_audio(assistant_pcm(480), 24000);
        session.on_caller_audio(&loud_payload()).unwrap();
        assert!(session.state().is_discarding());

        // The link drops before the model reports the interruption.
        session.on_link_reset();
        assert!(!session.state().is_discarding());

        session.on_caller_audio(&silent_payload()).unwrap();
        session.on_audio(assistant_pcm(480), 24000);
        assert_eq!(session.state().pending_len(), 1);
        assert_eq!(session.state().floor(), Floor::AssistantSpeaking);
    }

    #[tokio::test]
    async fn test_bad_model_audio_counted() {
        let (session, _) = session(Arc::new(RecordingControl::default()));

        session.on_audio(Bytes::from_static(&[1, 2, 3]), 24000);
        assert_eq!(session.handle().metrics().snapshot().format_errors, 1);
        assert_eq!(session.state().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_completed_handoff_retires_session() {
        let control = Arc::new(RecordingControl::default());
        let (session, registry) = session(control.clone());

        let call = ToolCallEvent {
            invocation_id: "fc-1".to_string(),
            name: TRANSFER_TOOL_NAME.to_string(),
            arguments: HashMap::from([("target".to_string(), "+15551234567".to_string())]),
            call_id: "CA1".to_string(),
        };
        // The result goes straight to the model link, not back through the loop.
        assert!(session.on_tool_call(call).await.is_none());

        assert_eq!(*control.redirects.lock(), vec!["+15551234567".to_string()]);
        assert_eq!(session.state().handoff_state(), HandoffState::Completed);
        assert!(session.handle().is_torn_down());
        assert_eq!(
            session.handle().end_reason(),
            Some(EndReason::HandoffCompleted)
        );
        assert!(registry.is_empty());

        // No further caller audio reaches the model.
        let decision = session.on_caller_audio(&loud_payload()).unwrap();
        assert!(!decision.forward_to_model);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (session, registry) = session(Arc::new(RecordingControl::default()));

        assert!(session.teardown(EndReason::TelephonyStop));
        assert!(!session.teardown(EndReason::IdleTimeout));
        assert_eq!(session.handle().end_reason(), Some(EndReason::TelephonyStop));
        assert!(registry.is_empty());
    }
}
