//! Telephony media stream side of the relay.

mod bridge;
pub mod messages;

use std::time::Duration;

pub use bridge::{TelephonyStreamBridge, drive_model, pump_inbound, pump_outbound};
pub use messages::{TwilioInbound, TwilioOutbound};

/// Timing for a media socket.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a new socket may take to send `start`.
    pub start_timeout: Duration,
    /// Tear down a session after this long without telephony activity.
    pub session_idle_timeout: Duration,
    /// Watchdog period for silence and idle checks.
    pub watchdog_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            session_idle_timeout: Duration::from_secs(30),
            watchdog_interval: Duration::from_millis(100),
        }
    }
}
