//! Session-level error and termination types.
//!
//! Component errors live next to the code that raises them. The ones that can
//! end or prevent a session ([`ModelError`], [`ControlApiError`],
//! [`RegistryError`]) convert into [`SessionError`], and [`EndReason`] records
//! why a session stopped.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::core::handoff::ControlApiError;
use crate::core::model::ModelError;
use crate::core::session::RegistryError;

/// Why a session was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The telephony socket closed or failed.
    TelephonyDisconnect,
    /// Telephony sent `stop`.
    TelephonyStop,
    /// The call was transferred to a human.
    HandoffCompleted,
    /// The model stream failed beyond recovery.
    ModelFailed(String),
    /// No telephony activity for too long.
    IdleTimeout,
    /// The server is shutting down.
    Shutdown,
    /// Any other session-fatal error.
    Failed(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::TelephonyDisconnect => write!(f, "telephony_disconnect"),
            EndReason::TelephonyStop => write!(f, "telephony_stop"),
            EndReason::HandoffCompleted => write!(f, "handoff_completed"),
            EndReason::ModelFailed(detail) => write!(f, "model_failed: {detail}"),
            EndReason::IdleTimeout => write!(f, "idle_timeout"),
            EndReason::Shutdown => write!(f, "shutdown"),
            EndReason::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// Errors that end or prevent a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    ControlApi(#[from] ControlApiError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Telephony connection closed")]
    TelephonyDisconnect,

    #[error("Telephony protocol error: {0}")]
    Protocol(String),

    #[error("No start message within {0:?}")]
    StartTimeout(Duration),
}

impl SessionError {
    /// Termination reason recorded when this error ends a session.
    pub fn end_reason(&self) -> EndReason {
        match self {
            SessionError::Model(e) => EndReason::ModelFailed(e.to_string()),
            SessionError::TelephonyDisconnect => EndReason::TelephonyDisconnect,
            other => EndReason::Failed(other.to_string()),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
