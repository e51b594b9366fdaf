use std::sync::Arc;

use serde_json::json;

use super::HandoffError;
use super::tools::{TRANSFER_TOOL_NAME, ToolCall};
use super::twilio::{CallControl, ControlApiError, TransferInstruction};
use crate::core::model::{ToolCallEvent, ToolResponse};
use crate::core::retry::RetryPolicy;
use crate::core::session::DuplexSessionState;

/// Default destination when neither the model nor the configuration names one.
pub const DEFAULT_TRANSFER_NUMBER: &str = "+1234567890";

/// Default announcement spoken before dialing.
pub const DEFAULT_ANNOUNCEMENT: &str =
    "I understand. Please hold while I connect you to a human agent.";

#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// Tool name that triggers a transfer
    pub tool_name: String,
    /// E.164 destination used when the tool call has no target
    pub default_target: String,
    /// Spoken to the caller before dialing
    pub announcement: String,
    /// Retries for the call-control request
    pub retry: RetryPolicy,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            tool_name: TRANSFER_TOOL_NAME.to_string(),
            default_target: DEFAULT_TRANSFER_NUMBER.to_string(),
            announcement: DEFAULT_ANNOUNCEMENT.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of handling one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffOutcome {
    /// The call was redirected; the session should be retired.
    Completed { target: String, reason: String },
    /// Redirect failed; the caller stays with the assistant.
    Failed { target: String, error: HandoffError },
    /// Arguments were invalid; nothing was attempted.
    Rejected(HandoffError),
    /// A handoff is already in flight or done.
    AlreadyInProgress,
    /// Not a tool this relay knows.
    Unrecognized { name: String },
}

impl HandoffOutcome {
    /// Tool response reporting this outcome to the model.
    pub fn tool_response(&self, event: &ToolCallEvent) -> Option<ToolResponse> {
        let response = match self {
            HandoffOutcome::Completed { target, .. } => json!({
                "status": "transferred",
                "target": target,
            }),
            HandoffOutcome::Failed { error, .. } => json!({
                "status": "failed",
                "error": error.to_string(),
                "instruction": "Apologize and tell the caller a human agent is not available right now.",
            }),
            HandoffOutcome::Rejected(error) => json!({
                "status": "rejected",
                "error": error.to_string(),
            }),
            HandoffOutcome::AlreadyInProgress => json!({ "status": "in_progress" }),
            HandoffOutcome::Unrecognized { .. } => return None,
        };

        Some(ToolResponse {
            invocation_id: event.invocation_id.clone(),
            name: event.name.clone(),
            response,
        })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, HandoffOutcome::Completed { .. })
    }
}

/// Interprets tool calls and drives the call-control redirect.
///
/// Stateless across calls: per-call handoff progress lives in the session's
/// [`DuplexSessionState`].
pub struct HandoffController {
    control: Arc<dyn CallControl>,
    config: HandoffConfig,
}

impl HandoffController {
    pub fn new(control: Arc<dyn CallControl>, config: HandoffConfig) -> Self {
        Self { control, config }
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    pub async fn on_tool_call(
        &self,
        event: &ToolCallEvent,
        state: &DuplexSessionState,
    ) -> HandoffOutcome {
        let call_id = event.call_id.as_str();

        let args = match ToolCall::parse(event, &self.config.tool_name) {
            Ok(ToolCall::TransferToHuman(args)) => args,
            Ok(ToolCall::Unrecognized { name }) => {
                tracing::warn!(call_id, tool = %name, "Ignoring unrecognized tool call");
                return HandoffOutcome::Unrecognized { name };
            }
            Err(e) => {
                tracing::warn!(call_id, "Rejected transfer request: {}", e);
                return HandoffOutcome::Rejected(e);
            }
        };

        if state.try_begin_handoff().is_none() {
            tracing::info!(call_id, "Handoff already in progress, ignoring duplicate request");
            return HandoffOutcome::AlreadyInProgress;
        }

        let target = args
            .target
            .unwrap_or_else(|| self.config.default_target.clone());
        tracing::info!(
            call_id,
            target = %target,
            reason = %args.reason,
            "Initiating transfer to human agent"
        );

        let instruction = TransferInstruction {
            destination: target.clone(),
            announcement: self.config.announcement.clone(),
        };

        let control = &self.control;
        let instruction = &instruction;
        let result = self
            .config
            .retry
            .run_when(
                "call_redirect",
                ControlApiError::is_retryable,
                move |_| async move { control.redirect(call_id, instruction).await },
            )
            .await;

        match result {
            Ok(()) => {
                let discarded = state.finish_handoff(true);
                tracing::info!(call_id, target = %target, discarded, "Call transferred");
                HandoffOutcome::Completed {
                    target,
                    reason: args.reason,
                }
            }
            Err((source, attempts)) => {
                state.finish_handoff(false);
                let error = HandoffError::Exhausted { attempts, source };
                tracing::error!(call_id, target = %target, "{}", error);
                HandoffOutcome::Failed { target, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{DuplexConfig, HandoffState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Instant;

    /// Records redirects and fails the first `failures` of them.
    struct ScriptedControl {
        failures: usize,
        status: u16,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedControl {
        fn new(failures: usize, status: u16) -> Arc<Self> {
            Arc::new(Self {
                failures,
                status,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CallControl for ScriptedControl {
        async fn redirect(
            &self,
            call_id: &str,
            instruction: &TransferInstruction,
        ) -> Result<(), ControlApiError> {
            let mut calls = self.calls.lock();
            calls.push((call_id.to_string(), instruction.destination.clone()));
            if calls.len() <= self.failures {
                Err(ControlApiError::Api {
                    status: self.status,
                    code: None,
                    message: "scripted failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn controller(control: Arc<ScriptedControl>) -> HandoffController {
        HandoffController::new(
            control,
            HandoffConfig {
                retry: RetryPolicy {
                    max_attempts: 3,
                    initial_delay_ms: 1,
                    max_delay_ms: 2,
                    backoff_multiplier: 2.0,
                    jitter: false,
                },
                ..Default::default()
            },
        )
    }

    fn state() -> DuplexSessionState {
        DuplexSessionState::new(DuplexConfig::default(), Instant::now())
    }

    fn transfer(args: &[(&str, &str)]) -> ToolCallEvent {
        ToolCallEvent {
            invocation_id: "fc-1".to_string(),
            name: TRANSFER_TOOL_NAME.to_string(),
            arguments: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            call_id: "CA1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_transfer_to_explicit_target() {
        let control = ScriptedControl::new(0, 500);
        let controller = controller(control.clone());
        let state = state();

        let outcome = controller
            .on_tool_call(&transfer(&[("target", "+15551234567")]), &state)
            .await;

        assert!(outcome.is_completed());
        assert_eq!(state.handoff_state(), HandoffState::Completed);
        assert_eq!(
            *control.calls.lock(),
            vec![("CA1".to_string(), "+15551234567".to_string())]
        );
    }

    #[tokio::test]
    async fn test_transfer_uses_default_target() {
        let control = ScriptedControl::new(0, 500);
        let controller = controller(control.clone());

        controller.on_tool_call(&transfer(&[]), &state()).await;
        assert_eq!(control.calls.lock()[0].1, DEFAULT_TRANSFER_NUMBER);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let control = ScriptedControl::new(2, 503);
        let controller = controller(control.clone());
        let state = state();

        let outcome = controller.on_tool_call(&transfer(&[]), &state).await;
        assert!(outcome.is_completed());
        assert_eq!(control.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_after_budget_keeps_requested() {
        let control = ScriptedControl::new(3, 500);
        let controller = controller(control.clone());
        let state = state();
        let event = transfer(&[]);

        let outcome = controller.on_tool_call(&event, &state).await;

        assert!(matches!(
            outcome,
            HandoffOutcome::Failed {
                error: HandoffError::Exhausted { attempts: 3, .. },
                ..
            }
        ));
        assert_eq!(control.calls.lock().len(), 3);
        assert_eq!(state.handoff_state(), HandoffState::Requested);
        assert!(!state.is_closed());

        let response = outcome.tool_response(&event).unwrap();
        assert_eq!(response.invocation_id, "fc-1");
        assert_eq!(response.response["status"], "failed");
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let control = ScriptedControl::new(5, 404);
        let controller = controller(control.clone());

        let outcome = controller.on_tool_call(&transfer(&[]), &state()).await;
        assert!(matches!(outcome, HandoffOutcome::Failed { .. }));
        assert_eq!(control.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected_without_request() {
        let control = ScriptedControl::new(0, 500);
        let controller = controller(control.clone());
        let state = state();

        let outcome = controller
            .on_tool_call(&transfer(&[("target", "555-1234")]), &state)
            .await;

        assert_eq!(
            outcome,
            HandoffOutcome::Rejected(HandoffError::InvalidTarget("555-1234".to_string()))
        );
        assert!(control.calls.lock().is_empty());
        assert_eq!(state.handoff_state(), HandoffState::None);
    }

    #[tokio::test]
    async fn test_unrecognized_tool_ignored() {
        let control = ScriptedControl::new(0, 500);
        let controller = controller(control.clone());
        let mut event = transfer(&[]);
        event.name = "get_weather".to_string();

        let outcome = controller.on_tool_call(&event, &state()).await;
        assert_eq!(
            outcome,
            HandoffOutcome::Unrecognized {
                name: "get_weather".to_string()
            }
        );
        assert!(outcome.tool_response(&event).is_none());
        assert!(control.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_second_request_after_completion_ignored() {
        let control = ScriptedControl::new(0, 500);
        let controller = controller(control.clone());
        let state = state();

        controller.on_tool_call(&transfer(&[]), &state).await;
        let outcome = controller.on_tool_call(&transfer(&[]), &state).await;

        assert_eq!(outcome, HandoffOutcome::AlreadyInProgress);
        assert_eq!(control.calls.lock().len(), 1);
    }
}
