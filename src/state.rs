use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::handoff::{CallControl, HandoffController, TwilioCallControl};
use crate::core::model::{GeminiLiveConnector, ModelConnector};
use crate::core::session::SessionRegistry;
use crate::core::telephony::TelephonyStreamBridge;
use crate::errors::SessionResult;

/// Application state shared by every route.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub bridge: Arc<TelephonyStreamBridge>,
}

impl AppState {
    /// Build the Gemini connector, Twilio client and bridge from `config`.
    pub fn new(config: ServerConfig) -> SessionResult<Arc<Self>> {
        let connector: Arc<dyn ModelConnector> =
            Arc::new(GeminiLiveConnector::new(config.gemini_config())?);
        let control: Arc<dyn CallControl> = Arc::new(TwilioCallControl::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_api_base.clone(),
        )?);

        Ok(Self::with_parts(config, connector, control))
    }

    /// Assemble state around explicit model and call-control implementations.
    ///
    /// Only the component configs derived from `config` are kept.
    pub fn with_parts(
        config: ServerConfig,
        connector: Arc<dyn ModelConnector>,
        control: Arc<dyn CallControl>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let handoff = Arc::new(HandoffController::new(control, config.handoff_config()));
        let bridge = Arc::new(TelephonyStreamBridge::new(
            registry.clone(),
            connector,
            handoff,
            config.model_client_config(),
            config.duplex_config(),
            config.bridge_config(),
        ));

        Arc::new(Self { registry, bridge })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SessionError;

    #[test]
    fn test_missing_gemini_key_is_model_error() {
        let config = ServerConfig::default();
        let err = AppState::new(config).err().unwrap();
        assert!(matches!(err, SessionError::Model(_)));
    }

    #[test]
    fn test_missing_twilio_credentials_is_control_error() {
        let mut config = ServerConfig::default();
        config.gemini_api_key = "test-key".to_string();
        let err = AppState::new(config).err().unwrap();
        assert!(matches!(err, SessionError::ControlApi(_)));
    }

    #[test]
    fn test_builds_with_credentials() {
        let mut config = ServerConfig::default();
        config.gemini_api_key = "test-key".to_string();
        config.twilio_account_sid = "AC123".to_string();
        config.twilio_auth_token = "token".to_string();

        let state = AppState::new(config).unwrap();
        assert!(state.registry.is_empty());
    }
}
