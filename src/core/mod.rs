pub mod codec;
pub mod handoff;
pub mod model;
pub mod queue;
pub mod retry;
pub mod session;
pub mod telephony;

// Re-export commonly used types for convenience
pub use codec::{AudioFrame, AudioFrameCodec, AudioSource, FormatError};

pub use handoff::{
    CallControl, ControlApiError, HandoffConfig, HandoffController, HandoffError, HandoffOutcome,
    TwilioCallControl,
};

pub use model::{
    GeminiLiveConfig, GeminiLiveConnector, ModelClientConfig, ModelConnector, ModelError,
    ModelEvent, ModelStreamClient,
};

pub use retry::RetryPolicy;

pub use session::{
    DuplexConfig, DuplexSessionState, Floor, HandoffState, Session, SessionHandle,
    SessionRegistry,
};

pub use telephony::{BridgeConfig, TelephonyStreamBridge};
