//! Handoff against a mock Twilio REST API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voxbridge::core::handoff::{
    HandoffConfig, HandoffController, HandoffOutcome, TRANSFER_TOOL_NAME, TwilioCallControl,
};
use voxbridge::core::model::ToolCallEvent;
use voxbridge::core::retry::RetryPolicy;
use voxbridge::core::session::{DuplexConfig, DuplexSessionState, HandoffState};

const CALL_PATH: &str = "/2010-04-01/Accounts/AC-test/Calls/CA-handoff.json";

fn controller(server: &MockServer) -> HandoffController {
    let control = TwilioCallControl::new("AC-test", "secret", server.uri()).unwrap();
    HandoffController::new(
        Arc::new(control),
        HandoffConfig {
            default_target: "+15550001111".to_string(),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        },
    )
}

fn transfer_call(arguments: HashMap<String, String>) -> ToolCallEvent {
    ToolCallEvent {
        invocation_id: "fc-1".to_string(),
        name: TRANSFER_TOOL_NAME.to_string(),
        arguments,
        call_id: "CA-handoff".to_string(),
    }
}

fn state() -> DuplexSessionState {
    DuplexSessionState::new(DuplexConfig::default(), Instant::now())
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "code": 20500,
            "message": "Service unavailable"
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CALL_PATH))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sid": "CA-handoff"})))
        .expect(1)
        .mount(&server)
        .await;

    let state = state();
    let outcome = controller(&server)
        .on_tool_call(&transfer_call(HashMap::new()), &state)
        .await;

    assert_eq!(
        outcome,
        HandoffOutcome::Completed {
            target: "+15550001111".to_string(),
            reason: voxbridge::core::handoff::tools::DEFAULT_TRANSFER_REASON.to_string(),
        }
    );
    assert_eq!(state.handoff_state(), HandoffState::Completed);
}

#[tokio::test]
async fn test_exhausted_retries_leave_call_connected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let state = state();
    let controller = controller(&server);
    let call = transfer_call(HashMap::from([(
        "target".to_string(),
        "+15552223333".to_string(),
    )]));
    let outcome = controller.on_tool_call(&call, &state).await;

    assert!(matches!(outcome, HandoffOutcome::Failed { ref target, .. } if target == "+15552223333"));
    assert_eq!(state.handoff_state(), HandoffState::Requested);
    assert!(!state.is_closed());

    let response = outcome.tool_response(&call).unwrap();
    assert_eq!(response.response["status"], "failed");
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALL_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 20404,
            "message": "The requested resource was not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let state = state();
    let outcome = controller(&server)
        .on_tool_call(&transfer_call(HashMap::new()), &state)
        .await;

    match outcome {
        HandoffOutcome::Failed { error, .. } => {
            assert!(error.to_string().contains("1 attempt"));
            assert!(error.to_string().contains("20404"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
