//! Tool-call driven handoff of a call to a human agent.

mod controller;
pub mod tools;
pub mod twilio;

use thiserror::Error;

pub use controller::{
    DEFAULT_ANNOUNCEMENT, DEFAULT_TRANSFER_NUMBER, HandoffConfig, HandoffController,
    HandoffOutcome,
};
pub use tools::{TRANSFER_TOOL_NAME, ToolCall, TransferArgs, transfer_tool_declaration};
pub use twilio::{
    CallControl, ControlApiError, TWILIO_API_BASE, TransferInstruction, TwilioCallControl,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("Transfer target is not an E.164 number: {0}")]
    InvalidTarget(String),

    #[error("Handoff failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        source: ControlApiError,
    },
}
