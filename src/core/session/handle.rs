use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::duplex::{DuplexSessionState, Floor, HandoffState};
use super::metrics::{SessionMetrics, SessionMetricsSnapshot};
use crate::errors::EndReason;

/// Shared handle to one active call.
///
/// Held by the registry and by every task working on the call. Teardown is
/// idempotent: only the first call records a reason and cancels the tasks.
pub struct SessionHandle {
    call_id: String,
    stream_sid: String,
    state: Arc<DuplexSessionState>,
    metrics: Arc<SessionMetrics>,
    cancel: CancellationToken,
    torn_down: AtomicBool,
    end_reason: Mutex<Option<EndReason>>,
    started_at_unix: u64,
}

impl SessionHandle {
    pub fn new(
        call_id: impl Into<String>,
        stream_sid: impl Into<String>,
        state: Arc<DuplexSessionState>,
    ) -> Self {
        let started_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            call_id: call_id.into(),
            stream_sid: stream_sid.into(),
            state,
            metrics: Arc::new(SessionMetrics::new()),
            cancel: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            end_reason: Mutex::new(None),
            started_at_unix,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn state(&self) -> &Arc<DuplexSessionState> {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    /// Token cancelled when the session is torn down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason.lock().clone()
    }

    /// Stop the session. Returns false if it was already torn down.
    pub fn teardown(&self, reason: EndReason) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                call_id = %self.call_id,
                reason = %reason,
                "Session already torn down"
            );
            return false;
        }

        tracing::info!(call_id = %self.call_id, reason = %reason, "Tearing down session");
        *self.end_reason.lock() = Some(reason);
        self.state.close();
        self.cancel.cancel();
        true
    }

    pub fn summary(&self) -> SessionSummary {
        let now = Instant::now();
        SessionSummary {
            call_id: self.call_id.clone(),
            stream_sid: self.stream_sid.clone(),
            floor: self.state.floor(),
            handoff_state: self.state.handoff_state(),
            pending_outbound: self.state.pending_len(),
            started_at: self.started_at_unix,
            age_ms: now.saturating_duration_since(self.state.created_at()).as_millis() as u64,
            idle_ms: now
                .saturating_duration_since(self.state.last_activity_at())
                .as_millis() as u64,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Serializable view of a session for the `/sessions` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub call_id: String,
    pub stream_sid: String,
    pub floor: Floor,
    pub handoff_state: HandoffState,
    pub pending_outbound: usize,
    /// Unix timestamp (seconds)
    pub started_at: u64,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub metrics: SessionMetricsSnapshot,
}
