//! Telephony call control through the Twilio REST API.
//!
//! A transfer rewrites the live call's instructions:
//! `POST {base}/2010-04-01/Accounts/{AccountSid}/Calls/{CallSid}.json` with a
//! `Twiml` form field that speaks an announcement and dials the destination.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Public Twilio API base URL.
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlApiError {
    #[error("Call control request failed: {0}")]
    Transport(String),

    #[error("Call control API error (HTTP {status}, code {}): {message}", .code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("Invalid call control configuration: {0}")]
    InvalidConfiguration(String),
}

impl ControlApiError {
    /// Transport failures, throttling and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControlApiError::Transport(_) => true,
            ControlApiError::Api { status, .. } => *status == 429 || *status >= 500,
            ControlApiError::InvalidConfiguration(_) => false,
        }
    }
}

/// What the call should do once the assistant lets go of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInstruction {
    /// E.164 number to dial.
    pub destination: String,
    /// Spoken before dialing; skipped when empty.
    pub announcement: String,
}

impl TransferInstruction {
    pub fn to_twiml(&self) -> String {
        let mut twiml = String::from("<Response>");
        if !self.announcement.is_empty() {
            twiml.push_str("<Say>");
            twiml.push_str(&escape_xml(&self.announcement));
            twiml.push_str("</Say>");
        }
        twiml.push_str("<Dial>");
        twiml.push_str(&escape_xml(&self.destination));
        twiml.push_str("</Dial></Response>");
        twiml
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Redirects a live call away from the relay.
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn redirect(
        &self,
        call_id: &str,
        instruction: &TransferInstruction,
    ) -> Result<(), ControlApiError>;
}

/// Error body returned by the Twilio API.
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

pub struct TwilioCallControl {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

impl Drop for TwilioCallControl {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.auth_token.zeroize();
    }
}

impl TwilioCallControl {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ControlApiError> {
        let account_sid = account_sid.into();
        let auth_token = auth_token.into();
        if account_sid.is_empty() || auth_token.is_empty() {
            return Err(ControlApiError::InvalidConfiguration(
                "Twilio account SID and auth token are required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                ControlApiError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
        })
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn redirect(
        &self,
        call_id: &str,
        instruction: &TransferInstruction,
    ) -> Result<(), ControlApiError> {
        let twiml = instruction.to_twiml();
        let response = self
            .client
            .post(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", twiml.as_str())])
            .send()
            .await
            .map_err(|e| ControlApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(call_id, status = status.as_u16(), "Call updated");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let (code, message) = match serde_json::from_str::<TwilioErrorBody>(&body) {
            Ok(parsed) => (parsed.code, parsed.message.unwrap_or(body)),
            Err(_) => (None, body),
        };

        Err(ControlApiError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}
