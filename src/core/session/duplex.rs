//! Per-call floor state machine.
//!
//! [`DuplexSessionState`] decides who holds the floor, which assistant frames
//! reach the caller, and where the handoff stands. Every operation is
//! synchronous and runs to completion under one short-lived lock, so the
//! inbound pump, the outbound pump, the model receive loop and the idle
//! watchdog all observe a consistent state. The lock is never held across an
//! `.await`.
//!
//! Floor rules:
//! - Voiced caller audio always wins. If the assistant holds the floor, pending
//!   assistant audio is discarded (not paused) and a barge-in is reported.
//! - Assistant audio takes the floor only from `Idle`, or from `CallerSpeaking`
//!   once the caller's latest frame is silent.
//! - After a barge-in, audio still arriving from the interrupted generation is
//!   dropped until the model reports a generation boundary.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::core::codec::AudioFrame;

/// Who currently holds the conversational floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Floor {
    Idle,
    CallerSpeaking,
    AssistantSpeaking,
}

/// Handoff progress. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffState {
    None,
    Requested,
    Completed,
}

/// Tunables for the floor state machine.
#[derive(Debug, Clone)]
pub struct DuplexConfig {
    /// Normalized RMS at or below which a caller frame counts as silence.
    pub silence_threshold: f32,
    /// How long the caller must stay silent before the floor returns to idle.
    pub caller_idle_timeout: Duration,
    /// Maximum number of assistant frames waiting for the telephony socket.
    pub outbound_queue_capacity: usize,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.02,
            caller_idle_timeout: Duration::from_millis(800),
            outbound_queue_capacity: 500,
        }
    }
}

/// What happened to an inbound caller frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundDecision {
    /// Forward the frame to the model.
    pub forward_to_model: bool,
    /// The frame carried speech energy.
    pub voiced: bool,
    /// Set when the frame interrupted assistant playback.
    pub barge_in: Option<BargeIn>,
}

/// Details of an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BargeIn {
    /// Pending assistant frames that were discarded.
    pub discarded: usize,
    /// The model was still generating when the caller cut in.
    pub generation_active: bool,
}

/// Why an assistant frame was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    CallerSpeaking,
    StaleGeneration,
    HandoffCompleted,
    Closed,
}

/// What happened to an outbound assistant frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundDecision {
    /// Queued for the caller. `evicted` is set when the oldest queued frame
    /// was dropped to make room.
    Enqueued { evicted: bool },
    Dropped(DropReason),
}

/// Next thing the outbound pump must write to the telephony socket.
#[derive(Debug, Clone)]
pub enum OutboundAction {
    /// Flush audio the telephony provider has already buffered.
    Clear,
    /// Play an assistant frame.
    Frame(AudioFrame),
    /// Tag the end of an assistant turn; the provider echoes it once played.
    Mark(String),
}

#[derive(Debug)]
struct DuplexInner {
    floor: Floor,
    pending: VecDeque<AudioFrame>,
    handoff: HandoffState,
    handoff_in_flight: bool,
    last_activity_at: Instant,
    last_caller_voice_at: Option<Instant>,
    caller_voiced: bool,
    discarding_stale: bool,
    generation_active: bool,
    playback_until: Option<Instant>,
    clear_pending: bool,
    unmarked_playback: bool,
    mark_seq: u64,
    last_mark: Option<String>,
    closed: bool,
}

impl DuplexInner {
    /// Release the floor once the assistant has nothing left to say or play.
    fn settle(&mut self, now: Instant) {
        if self.floor == Floor::AssistantSpeaking
            && self.pending.is_empty()
            && !self.generation_active
            && !self.clear_pending
            && !self.unmarked_playback
            && self.playback_until.is_none_or(|until| until <= now)
        {
            self.floor = Floor::Idle;
            self.playback_until = None;
        }
    }
}

pub struct DuplexSessionState {
    inner: Mutex<DuplexInner>,
    outbound_ready: Notify,
    config: DuplexConfig,
    created_at: Instant,
}

impl DuplexSessionState {
    pub fn new(config: DuplexConfig, now: Instant) -> Self {
        Self {
            inner: Mutex::new(DuplexInner {
                floor: Floor::Idle,
                pending: VecDeque::with_capacity(config.outbound_queue_capacity.max(1)),
                handoff: HandoffState::None,
                handoff_in_flight: false,
                last_activity_at: now,
                last_caller_voice_at: None,
                caller_voiced: false,
                discarding_stale: false,
                generation_active: false,
                playback_until: None,
                clear_pending: false,
                unmarked_playback: false,
                mark_seq: 0,
                last_mark: None,
                closed: false,
            }),
            outbound_ready: Notify::new(),
            config,
            created_at: now,
        }
    }

    /// Apply a caller frame.
    pub fn on_inbound_frame(&self, frame: &AudioFrame, now: Instant) -> InboundDecision {
        let voiced = !frame.is_silent(self.config.silence_threshold);

        let decision = {
            let mut inner = self.inner.lock();
            inner.last_activity_at = now;

            if inner.closed || inner.handoff == HandoffState::Completed {
                return InboundDecision {
                    forward_to_model: false,
                    voiced,
                    barge_in: None,
                };
            }

            inner.settle(now);
            inner.caller_voiced = voiced;

            let mut barge_in = None;
            if voiced {
                inner.last_caller_voice_at = Some(now);
                match inner.floor {
                    Floor::AssistantSpeaking => {
                        let discarded = inner.pending.len();
                        inner.pending.clear();
                        inner.floor = Floor::CallerSpeaking;
                        inner.discarding_stale = inner.generation_active;
                        inner.clear_pending = true;
                        inner.unmarked_playback = false;
                        inner.playback_until = None;
                        barge_in = Some(BargeIn {
                            discarded,
                            generation_active: inner.generation_active,
                        });
                    }
                    Floor::Idle => inner.floor = Floor::CallerSpeaking,
                    Floor::CallerSpeaking => {}
                }
            }

            InboundDecision {
                forward_to_model: true,
                voiced,
                barge_in,
            }
        };

        if decision.barge_in.is_some() {
            self.outbound_ready.notify_one();
        }
        decision
    }

    /// Offer an assistant frame for playback.
    pub fn on_outbound_frame(&self, frame: AudioFrame, _now: Instant) -> OutboundDecision {
        let decision = {
            let mut inner = self.inner.lock();

            if inner.closed {
                return OutboundDecision::Dropped(DropReason::Closed);
            }
            if inner.handoff == HandoffState::Completed {
                return OutboundDecision::Dropped(DropReason::HandoffCompleted);
            }
            if inner.discarding_stale {
                return OutboundDecision::Dropped(DropReason::StaleGeneration);
            }

            inner.generation_active = true;

            match inner.floor {
                Floor::CallerSpeaking if inner.caller_voiced => {
                    return OutboundDecision::Dropped(DropReason::CallerSpeaking);
                }
                Floor::CallerSpeaking | Floor::Idle => inner.floor = Floor::AssistantSpeaking,
                Floor::AssistantSpeaking => {}
            }

            let evicted = if inner.pending.len() >= self.config.outbound_queue_capacity.max(1) {
                inner.pending.pop_front();
                true
            } else {
                false
            };
            inner.pending.push_back(frame);
            OutboundDecision::Enqueued { evicted }
        };

        self.outbound_ready.notify_one();
        decision
    }

    /// Return the floor to idle when the caller has been silent long enough.
    ///
    /// Also releases an assistant floor whose playback has finished. Returns
    /// whether the caller's floor was released.
    pub fn on_silence_timeout(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        inner.settle(now);

        if inner.floor != Floor::CallerSpeaking {
            return false;
        }

        let silent_for = inner
            .last_caller_voice_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if silent_for >= self.config.caller_idle_timeout {
            inner.floor = Floor::Idle;
            inner.caller_voiced = false;
            true
        } else {
            false
        }
    }

    /// The model finished or abandoned its current generation.
    pub fn on_generation_boundary(&self, now: Instant) {
        {
            let mut inner = self.inner.lock();
            inner.discarding_stale = false;
            inner.generation_active = false;
            inner.settle(now);
        }
        self.outbound_ready.notify_one();
    }

    /// Forget the current generation after the model link was replaced.
    ///
    /// Audio already queued for the caller still plays out; only the
    /// generation flags are cleared.
    pub fn reset_generation(&self, now: Instant) {
        self.on_generation_boundary(now);
    }

    /// Telephony echoed a playback mark.
    ///
    /// Returns true when the mark confirms the latest assistant turn has
    /// finished playing.
    pub fn on_playback_mark(&self, name: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        inner.last_activity_at = now;

        let latest = inner.last_mark.as_deref() == Some(name);
        if latest && inner.pending.is_empty() && !inner.unmarked_playback {
            inner.playback_until = Some(now);
            inner.settle(now);
            true
        } else {
            false
        }
    }

    /// Record non-audio telephony activity (marks, DTMF).
    pub fn touch(&self, now: Instant) {
        self.inner.lock().last_activity_at = now;
    }

    /// Take the next outbound action without waiting.
    pub fn take_outbound(&self, now: Instant) -> Option<OutboundAction> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }

        if inner.clear_pending {
            inner.clear_pending = false;
            return Some(OutboundAction::Clear);
        }

        if let Some(frame) = inner.pending.pop_front() {
            let start = inner
                .playback_until
                .filter(|until| *until > now)
                .unwrap_or(now);
            inner.playback_until = Some(start + Duration::from_millis(frame.duration_ms()));
            inner.unmarked_playback = true;
            return Some(OutboundAction::Frame(frame));
        }

        if inner.unmarked_playback && !inner.generation_active {
            inner.unmarked_playback = false;
            inner.mark_seq += 1;
            let name = format!("turn-{}", inner.mark_seq);
            inner.last_mark = Some(name.clone());
            return Some(OutboundAction::Mark(name));
        }

        inner.settle(now);
        None
    }

    /// Wait for the next outbound action. Returns `None` once the session is closed.
    pub async fn next_outbound(&self) -> Option<OutboundAction> {
        loop {
            if let Some(action) = self.take_outbound(Instant::now()) {
                return Some(action);
            }
            if self.is_closed() {
                return None;
            }
            self.outbound_ready.notified().await;
        }
    }

    /// Start a handoff. Returns the previous state, or `None` when a handoff is
    /// already in flight or completed.
    pub fn try_begin_handoff(&self) -> Option<HandoffState> {
        let mut inner = self.inner.lock();
        if inner.closed || inner.handoff_in_flight || inner.handoff == HandoffState::Completed {
            return None;
        }
        let previous = inner.handoff;
        inner.handoff = HandoffState::Requested;
        inner.handoff_in_flight = true;
        Some(previous)
    }

    /// Finish an in-flight handoff.
    ///
    /// On success the handoff becomes `Completed` and pending assistant audio
    /// is discarded; the number of discarded frames is returned. On failure the
    /// state stays `Requested`.
    pub fn finish_handoff(&self, completed: bool) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.handoff_in_flight = false;
            if completed && inner.handoff == HandoffState::Requested {
                inner.handoff = HandoffState::Completed;
                inner.floor = Floor::Idle;
                inner.clear_pending = false;
                inner.unmarked_playback = false;
                let discarded = inner.pending.len();
                inner.pending.clear();
                discarded
            } else {
                0
            }
        };
        self.outbound_ready.notify_one();
        discarded
    }

    /// Stop all playback. Pending frames are released.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.pending.clear();
        }
        self.outbound_ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn floor(&self) -> Floor {
        self.inner.lock().floor
    }

    pub fn handoff_state(&self) -> HandoffState {
        self.inner.lock().handoff
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_discarding(&self) -> bool {
        self.inner.lock().discarding_stale
    }

    pub fn last_activity_at(&self) -> Instant {
        self.inner.lock().last_activity_at
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn config(&self) -> &DuplexConfig {
        &self.config
    }
}
