//! Per-session counters
//!
//! Lock-free atomic counters updated from every session task and read by the
//! `/sessions` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for a single call session
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Telephony media frames received
    frames_in: AtomicU64,
    /// Caller frames forwarded to the model
    frames_to_model: AtomicU64,
    /// Assistant frames received from the model
    frames_from_model: AtomicU64,
    /// Assistant frames written to the telephony socket
    frames_out: AtomicU64,
    /// Assistant frames dropped (caller holding the floor, stale generation, overflow)
    frames_dropped: AtomicU64,
    /// Caller frames evicted from the model send queue
    backpressure_drops: AtomicU64,
    /// Barge-in interruptions
    barge_ins: AtomicU64,
    /// Undecodable audio payloads
    format_errors: AtomicU64,
    /// Malformed or errored model events
    stream_errors: AtomicU64,
    /// Model stream reconnects
    reconnects: AtomicU64,
    /// Tool calls received from the model
    tool_calls: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_to_model(&self) {
        self.frames_to_model.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_from_model(&self) {
        self.frames_from_model.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_backpressure_drop(&self) {
        self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_barge_in(&self) {
        self.barge_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_format_error(&self) {
        self.format_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stream error and return the running total.
    pub fn record_stream_error(&self) -> u64 {
        self.stream_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_errors(&self) -> u64 {
        self.stream_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_to_model: self.frames_to_model.load(Ordering::Relaxed),
            frames_from_model: self.frames_from_model.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            format_errors: self.format_errors.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetricsSnapshot {
    pub frames_in: u64,
    pub frames_to_model: u64,
    pub frames_from_model: u64,
    pub frames_out: u64,
    pub frames_dropped: u64,
    pub backpressure_drops: u64,
    pub barge_ins: u64,
    pub format_errors: u64,
    pub stream_errors: u64,
    pub reconnects: u64,
    pub tool_calls: u64,
}
