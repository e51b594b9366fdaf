//! Tool calls the relay understands.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::HandoffError;
use crate::core::model::ToolCallEvent;
use crate::core::model::gemini::FunctionDeclaration;

/// Default name of the transfer tool.
pub const TRANSFER_TOOL_NAME: &str = "transfer_to_human";

/// Reason used when the model omits one.
pub const DEFAULT_TRANSFER_REASON: &str = "user_request";

static E164: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+[1-9]\d{1,14}$").unwrap_or_else(|e| panic!("invalid E.164 pattern: {e}"))
});

/// Whether `number` is an E.164 phone number (`+` then up to 15 digits).
pub fn is_e164(number: &str) -> bool {
    E164.is_match(number)
}

/// Arguments of the transfer tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArgs {
    pub reason: String,
    /// Explicit destination; the configured default is used when absent.
    pub target: Option<String>,
}

/// A tool call, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    TransferToHuman(TransferArgs),
    Unrecognized { name: String },
}

impl ToolCall {
    /// Classify `event`, validating transfer arguments.
    pub fn parse(event: &ToolCallEvent, transfer_tool_name: &str) -> Result<Self, HandoffError> {
        if event.name != transfer_tool_name {
            return Ok(ToolCall::Unrecognized {
                name: event.name.clone(),
            });
        }

        let reason = event
            .arguments
            .get("reason")
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_TRANSFER_REASON)
            .to_string();

        let target = match event.arguments.get("target").map(|t| t.trim()) {
            None | Some("") => None,
            Some(target) if is_e164(target) => Some(target.to_string()),
            Some(target) => return Err(HandoffError::InvalidTarget(target.to_string())),
        };

        Ok(ToolCall::TransferToHuman(TransferArgs { reason, target }))
    }
}

/// Function declaration advertised to the model for the transfer tool.
pub fn transfer_tool_declaration(name: &str) -> FunctionDeclaration {
    FunctionDeclaration {
        name: name.to_string(),
        description: "Connect the user to a live human agent.".to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "reason": {
                    "type": "STRING",
                    "description": "Why the user wants a human"
                },
                "target": {
                    "type": "STRING",
                    "description": "Optional destination phone number in E.164 format"
                }
            },
            "required": ["reason"]
        }),
    }
}
