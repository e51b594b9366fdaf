use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use super::BridgeConfig;
use super::messages::{StartMetadata, TwilioInbound, TwilioOutbound};
use crate::core::handoff::HandoffController;
use crate::core::model::{ModelClientConfig, ModelConnector, ModelStreamClient};
use crate::core::session::{
    DuplexConfig, DuplexSessionState, OutboundAction, Session, SessionHandle, SessionRegistry,
};
use crate::errors::{EndReason, SessionError};

/// Connects telephony media sockets to model streams.
///
/// One bridge serves every call; per-call state lives in the [`Session`]
/// each connection creates.
pub struct TelephonyStreamBridge {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn ModelConnector>,
    handoff: Arc<HandoffController>,
    model_config: ModelClientConfig,
    duplex_config: DuplexConfig,
    config: BridgeConfig,
}

impl TelephonyStreamBridge {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn ModelConnector>,
        handoff: Arc<HandoffController>,
        model_config: ModelClientConfig,
        duplex_config: DuplexConfig,
        config: BridgeConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            handoff,
            model_config,
            duplex_config,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Read until the `start` event, then create and register the session.
    pub async fn accept_connection<S, E>(
        &self,
        stream: &mut S,
    ) -> Result<Arc<Session>, SessionError>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let start = tokio::time::timeout(self.config.start_timeout, wait_for_start(stream))
            .await
            .map_err(|_| SessionError::StartTimeout(self.config.start_timeout))??;

        info!(
            call_id = %start.call_sid,
            stream_sid = %start.stream_sid,
            tracks = ?start.tracks,
            "Media stream started"
        );
        if let Some(format) = &start.media_format
            && (format.encoding != "audio/x-mulaw" || format.sample_rate != 8000)
        {
            warn!(
                call_id = %start.call_sid,
                encoding = %format.encoding,
                sample_rate = format.sample_rate,
                "Unexpected media format, decoding as 8 kHz μ-law"
            );
        }

        self.create_session(start)
    }

    fn create_session(&self, start: StartMetadata) -> Result<Arc<Session>, SessionError> {
        let state = Arc::new(DuplexSessionState::new(
            self.duplex_config.clone(),
            Instant::now(),
        ));
        let handle = Arc::new(SessionHandle::new(
            start.call_sid.clone(),
            start.stream_sid,
            state,
        ));
        let model = Arc::new(ModelStreamClient::new(
            self.connector.clone(),
            self.model_config.clone(),
            start.call_sid,
            handle.metrics().clone(),
        ));

        self.registry.insert(handle.clone())?;

        Ok(Arc::new(Session::new(
            handle,
            model,
            self.handoff.clone(),
            self.registry.clone(),
        )))
    }

    /// Drive one media socket from `start` to teardown.
    pub async fn run_media_session<K, S, E>(
        &self,
        mut sink: K,
        mut stream: S,
    ) -> Result<(), SessionError>
    where
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: Display,
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let session = match self.accept_connection(&mut stream).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Rejecting media stream: {}", e);
                let _ = sink.send(Message::Close(None)).await;
                return Err(e);
            }
        };

        let model_task = tokio::spawn(drive_model(session.clone()));
        let outbound_task = tokio::spawn(pump_outbound(session.clone(), sink));

        pump_inbound(session.clone(), stream, self.config.clone()).await;

        session.teardown(EndReason::TelephonyDisconnect);
        if let Err(e) = outbound_task.await {
            error!(call_id = %session.call_id(), "Outbound pump panicked: {}", e);
        }
        if let Err(e) = model_task.await {
            error!(call_id = %session.call_id(), "Model task panicked: {}", e);
        }
        session.model().close().await;

        let handle = session.handle();
        info!(
            call_id = %session.call_id(),
            reason = %handle.end_reason().map(|r| r.to_string()).unwrap_or_default(),
            metrics = ?handle.metrics().snapshot(),
            "Session ended"
        );
        Ok(())
    }
}

async fn wait_for_start<S, E>(stream: &mut S) -> Result<StartMetadata, SessionError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return Err(SessionError::TelephonyDisconnect),
            Ok(_) => continue,
            Err(e) => {
                warn!("Media socket error before start: {}", e);
                return Err(SessionError::TelephonyDisconnect);
            }
        };

        match TwilioInbound::parse(text.as_str()) {
            Ok(TwilioInbound::Start { start, .. }) => return Ok(start),
            Ok(TwilioInbound::Connected { protocol, version }) => {
                debug!(?protocol, ?version, "Media stream connected");
            }
            Ok(TwilioInbound::Stop { .. }) => return Err(SessionError::TelephonyDisconnect),
            Ok(other) => debug!(event = ?other, "Ignoring event before start"),
            Err(e) => return Err(SessionError::Protocol(e.to_string())),
        }
    }
    Err(SessionError::TelephonyDisconnect)
}

/// Connect the model and dispatch its events until the session ends.
pub async fn drive_model(session: Arc<Session>) {
    let cancel = session.handle().cancel_token();

    let started = tokio::select! {
        _ = cancel.cancelled() => return,
        started = session.model().start() => started,
    };
    if let Err(e) = started {
        session.teardown(SessionError::from(e).end_reason());
        return;
    }

    if let Err(e) = session.model().run(session.as_ref(), cancel).await {
        error!(call_id = %session.call_id(), "Model stream failed: {}", e);
        session.teardown(SessionError::from(e).end_reason());
    }
}

/// Read caller messages until the socket closes or the session ends.
///
/// Also runs the per-session watchdog: caller silence releases the floor and
/// a session with no telephony activity for `session_idle_timeout` is torn down.
pub async fn pump_inbound<S, E>(session: Arc<Session>, mut stream: S, config: BridgeConfig)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let cancel = session.handle().cancel_token();
    let state = session.state().clone();
    let mut watchdog = tokio::time::interval(config.watchdog_interval);
    watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = watchdog.tick() => {
                let now = Instant::now();
                if state.on_silence_timeout(now) {
                    debug!(call_id = %session.call_id(), "Caller went quiet, floor released");
                }
                let idle = now.saturating_duration_since(state.last_activity_at());
                if idle >= config.session_idle_timeout {
                    warn!(
                        call_id = %session.call_id(),
                        idle_ms = idle.as_millis() as u64,
                        "No telephony activity, closing session"
                    );
                    session.teardown(EndReason::IdleTimeout);
                    return;
                }
            }
            message = stream.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(call_id = %session.call_id(), ?frame, "Telephony closed the socket");
                        session.teardown(EndReason::TelephonyDisconnect);
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(call_id = %session.call_id(), "Media socket error: {}", e);
                        session.teardown(EndReason::TelephonyDisconnect);
                        return;
                    }
                    None => {
                        session.teardown(EndReason::TelephonyDisconnect);
                        return;
                    }
                };

                if !on_telephony_message(&session, text.as_str()) {
                    return;
                }
            }
        }
    }
}

/// Apply one telephony message. Returns false once the stream has stopped.
fn on_telephony_message(session: &Session, text: &str) -> bool {
    let event = match TwilioInbound::parse(text) {
        Ok(event) => event,
        Err(e) => {
            session.handle().metrics().record_format_error();
            warn!(call_id = %session.call_id(), "Unparseable telephony message: {}", e);
            return true;
        }
    };

    let now = Instant::now();
    match event {
        TwilioInbound::Media { media } => {
            if media.is_inbound() {
                // Errors are counted inside; the frame is simply dropped.
                let _ = session.on_caller_audio(&media.payload);
            }
        }
        TwilioInbound::Mark { mark } => {
            if session.state().on_playback_mark(&mark.name, now) {
                debug!(call_id = %session.call_id(), mark = %mark.name, "Assistant turn played out");
            }
        }
        TwilioInbound::Dtmf { dtmf } => {
            session.state().touch(now);
            info!(call_id = %session.call_id(), digit = %dtmf.digit, "DTMF received");
        }
        TwilioInbound::Stop { .. } => {
            info!(call_id = %session.call_id(), "Telephony stopped the stream");
            session.teardown(EndReason::TelephonyStop);
            return false;
        }
        TwilioInbound::Start { .. } => {
            warn!(call_id = %session.call_id(), "Ignoring repeated start event");
        }
        TwilioInbound::Connected { .. } | TwilioInbound::Unknown => {
            session.state().touch(now);
        }
    }
    true
}

/// Write queued assistant audio, marks and clears to the telephony socket.
///
/// Closes the socket once the session ends.
pub async fn pump_outbound<K>(session: Arc<Session>, mut sink: K)
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let cancel = session.handle().cancel_token();
    let state = session.state().clone();
    let stream_sid = session.handle().stream_sid().to_string();
    let metrics = session.handle().metrics().clone();

    loop {
        let action = tokio::select! {
            _ = cancel.cancelled() => break,
            action = state.next_outbound() => action,
        };
        let Some(action) = action else {
            break;
        };

        let (message, is_frame) = match action {
            OutboundAction::Clear => (TwilioOutbound::clear(&stream_sid), false),
            OutboundAction::Frame(frame) => match session.codec().encode_outbound(&frame) {
                Ok(payload) => (TwilioOutbound::media(&stream_sid, payload), true),
                Err(e) => {
                    metrics.record_format_error();
                    debug!(call_id = %session.call_id(), "Dropping assistant frame: {}", e);
                    continue;
                }
            },
            OutboundAction::Mark(name) => (TwilioOutbound::mark(&stream_sid, name), false),
        };

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(call_id = %session.call_id(), "Failed to serialize telephony message: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(json.into())).await {
            warn!(call_id = %session.call_id(), "Failed to write to media socket: {}", e);
            session.teardown(EndReason::TelephonyDisconnect);
            return;
        }
        if is_frame {
            metrics.record_frame_out();
        }
    }

    debug!(call_id = %session.call_id(), "Closing media socket");
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handoff::{CallControl, ControlApiError, HandoffConfig, TransferInstruction};
    use crate::core::model::{ModelError, ModelLink, ModelSession};
    use crate::core::queue::DropOldestQueue;
    use crate::core::retry::RetryPolicy;
    use async_trait::async_trait;
    use base64::prelude::*;
    use bytes::Bytes;
    use futures::channel::mpsc;
    use serde_json::{Value, json};
    use std::time::Duration;

    struct PendingConnector;

    #[async_trait]
    impl ModelConnector for PendingConnector {
        fn name(&self) -> &'static str {
            "pending"
        }

        async fn connect(
            &self,
            _session: &ModelSession,
            _audio: Arc<DropOldestQueue<Bytes>>,
        ) -> Result<ModelLink, ModelError> {
            // Never completes; the session runs without a model.
            futures::future::pending().await
        }
    }

    struct RejectingConnector;

    #[async_trait]
    impl ModelConnector for RejectingConnector {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        async fn connect(
            &self,
            _session: &ModelSession,
            _audio: Arc<DropOldestQueue<Bytes>>,
        ) -> Result<ModelLink, ModelError> {
            Err(ModelError::SetupRejected("unknown model".to_string()))
        }
    }

    struct NoopControl;

    #[async_trait]
    impl CallControl for NoopControl {
        async fn redirect(
            &self,
            _call_id: &str,
            _instruction: &TransferInstruction,
        ) -> Result<(), ControlApiError> {
            Ok(())
        }
    }

    fn bridge(config: BridgeConfig) -> TelephonyStreamBridge {
        bridge_with(Arc::new(PendingConnector), config)
    }

    fn bridge_with(
        connector: Arc<dyn ModelConnector>,
        config: BridgeConfig,
    ) -> TelephonyStreamBridge {
        TelephonyStreamBridge::new(
            Arc::new(SessionRegistry::new()),
            connector,
            Arc::new(HandoffController::new(
                Arc::new(NoopControl),
                HandoffConfig {
                    retry: RetryPolicy::no_retry(),
                    ..Default::default()
                },
            )),
            ModelClientConfig {
                connect_timeout: Duration::from_secs(60),
                retry: RetryPolicy::no_retry(),
                ..Default::default()
            },
            DuplexConfig::default(),
            config,
        )
    }

    fn text(value: Value) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string().into()))
    }

    fn start_event(call_sid: &str) -> Result<Message, axum::Error> {
        text(json!({
            "event": "start",
            "streamSid": "MZ1",
            "start": {"callSid": call_sid, "streamSid": "MZ1", "tracks": ["inbound"]}
        }))
    }

    fn loud_media() -> Result<Message, axum::Error> {
        let ulaw: Vec<u8> = (0..160).map(|i| if i % 2 == 0 { 0x00 } else { 0x80 }).collect();
        text(json!({
            "event": "media",
            "streamSid": "MZ1",
            "media": {"track": "inbound", "payload": BASE64_STANDARD.encode(ulaw)}
        }))
    }

    fn assistant_pcm() -> Bytes {
        let mut out = Vec::new();
        for i in 0..480 {
            let sample: i16 = if i % 2 == 0 { 6000 } else { -6000 };
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Bytes::from(out)
    }

    fn parse_sent(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accept_connection_registers_session() {
        let bridge = bridge(BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![
            text(json!({"event": "connected", "protocol": "Call", "version": "1.0.0"})),
            start_event("CA1"),
        ]);

        let session = bridge.accept_connection(&mut stream).await.unwrap();
        assert_eq!(session.call_id(), "CA1");
        assert_eq!(session.handle().stream_sid(), "MZ1");
        assert!(bridge.registry().contains("CA1"));
    }

    #[tokio::test]
    async fn test_accept_connection_rejects_duplicate_call() {
        let bridge = bridge(BridgeConfig::default());
        let mut first = futures::stream::iter(vec![start_event("CA1")]);
        let mut second = futures::stream::iter(vec![start_event("CA1")]);

        bridge.accept_connection(&mut first).await.unwrap();
        let err = bridge.accept_connection(&mut second).await.err().unwrap();
        assert!(matches!(err, SessionError::Registry(_)));
    }

    #[tokio::test]
    async fn test_accept_connection_stream_ends_before_start() {
        let bridge = bridge(BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![text(json!({"event": "connected"}))]);

        let err = bridge.accept_connection(&mut stream).await.err().unwrap();
        assert!(matches!(err, SessionError::TelephonyDisconnect));
        assert!(bridge.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_connection_times_out() {
        let bridge = bridge(BridgeConfig {
            start_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let mut stream = futures::stream::pending::<Result<Message, axum::Error>>();

        let err = bridge.accept_connection(&mut stream).await.err().unwrap();
        assert!(matches!(err, SessionError::StartTimeout(_)));
    }

    #[tokio::test]
    async fn test_stop_event_ends_session() {
        let bridge = bridge(BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![start_event("CA1")]);
        let session = bridge.accept_connection(&mut stream).await.unwrap();

        let inbound = futures::stream::iter(vec![
            loud_media(),
            text(json!({"event": "stop", "stop": {"callSid": "CA1"}})),
        ])
        .chain(futures::stream::pending());
        pump_inbound(session.clone(), inbound, BridgeConfig::default()).await;

        assert_eq!(session.handle().end_reason(), Some(EndReason::TelephonyStop));
        assert_eq!(session.handle().metrics().snapshot().frames_in, 1);
        assert!(bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_model_setup_failure_ends_session() {
        let bridge = bridge_with(Arc::new(RejectingConnector), BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![start_event("CA1")]);
        let session = bridge.accept_connection(&mut stream).await.unwrap();

        drive_model(session.clone()).await;

        assert_eq!(
            session.handle().end_reason(),
            Some(EndReason::ModelFailed(
                "Model rejected session setup: unknown model".to_string()
            ))
        );
        assert!(bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_socket_close_is_telephony_disconnect() {
        let bridge = bridge(BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![start_event("CA1")]);
        let session = bridge.accept_connection(&mut stream).await.unwrap();

        pump_inbound(
            session.clone(),
            futures::stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]),
            BridgeConfig::default(),
        )
        .await;

        assert_eq!(
            session.handle().end_reason(),
            Some(EndReason::TelephonyDisconnect)
        );
    }

    #[tokio::test]
    async fn test_idle_watchdog_tears_down() {
        let config = BridgeConfig {
            session_idle_timeout: Duration::from_millis(150),
            watchdog_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let bridge = bridge(config.clone());
        let mut stream = futures::stream::iter(vec![start_event("CA1")]);
        let session = bridge.accept_connection(&mut stream).await.unwrap();

        pump_inbound(
            session.clone(),
            futures::stream::pending::<Result<Message, axum::Error>>(),
            config,
        )
        .await;

        assert_eq!(session.handle().end_reason(), Some(EndReason::IdleTimeout));
    }

    #[tokio::test]
    async fn test_outbound_writes_frames_then_mark() {
        let bridge = bridge(BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![start_event("CA1")]);
        let session = bridge.accept_connection(&mut stream).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let pump = tokio::spawn(pump_outbound(session.clone(), tx));

        use crate::core::model::ModelEventHandler;
        session.on_audio(assistant_pcm(), 24000);
        session.on_audio(assistant_pcm(), 24000);
        session.on_generation_boundary(false);

        let first = parse_sent(rx.next().await.unwrap());
        assert_eq!(first["event"], "media");
        assert_eq!(first["streamSid"], "MZ1");
        assert_eq!(parse_sent(rx.next().await.unwrap())["event"], "media");
        let mark = parse_sent(rx.next().await.unwrap());
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["mark"]["name"], "turn-1");

        session.teardown(EndReason::TelephonyStop);
        pump.await.unwrap();
        assert!(matches!(rx.next().await, Some(Message::Close(_))));
        assert_eq!(session.handle().metrics().snapshot().frames_out, 2);
    }

    #[tokio::test]
    async fn test_barge_in_sends_clear_before_anything_else() {
        let bridge = bridge(BridgeConfig::default());
        let mut stream = futures::stream::iter(vec![start_event("CA1")]);
        let session = bridge.accept_connection(&mut stream).await.unwrap();

        use crate::core::model::ModelEventHandler;
        for _ in 0..3 {
            session.on_audio(assistant_pcm(), 24000);
        }
        // Caller interrupts before the outbound pump has written anything.
        let media = loud_media().unwrap().into_text().unwrap();
        assert!(on_telephony_message(&session, media.as_str()));

        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let pump = tokio::spawn(pump_outbound(session.clone(), tx));

        assert_eq!(parse_sent(rx.next().await.unwrap())["event"], "clear");

        session.teardown(EndReason::TelephonyStop);
        pump.await.unwrap();
        // Only the close frame follows: no stale assistant audio.
        assert!(matches!(rx.next().await, Some(Message::Close(_))));
        assert_eq!(session.handle().metrics().snapshot().frames_out, 0);
    }

    #[tokio::test]
    async fn test_run_media_session_rejects_without_start() {
        let bridge = bridge(BridgeConfig::default());
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let stream = futures::stream::iter(vec![text(json!({"event": "stop"}))]);

        let result = bridge.run_media_session(tx, stream).await;
        assert!(result.is_err());
        assert!(matches!(rx.next().await, Some(Message::Close(None))));
    }
}
