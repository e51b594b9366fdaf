use super::{ConfigError, ServerConfig};
use crate::core::handoff::tools::is_e164;

/// Validate the merged configuration.
///
/// Missing credentials are reported together so a single start attempt lists
/// everything that needs to be set.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_credentials(config)?;
    validate_transfer(config)?;
    validate_relay(config)
}

fn validate_credentials(config: &ServerConfig) -> Result<(), ConfigError> {
    let mut missing = Vec::new();
    if config.gemini_api_key.trim().is_empty() {
        missing.push("GEMINI_API_KEY");
    }
    if config.twilio_account_sid.trim().is_empty() {
        missing.push("TWILIO_ACCOUNT_SID");
    }
    if config.twilio_auth_token.trim().is_empty() {
        missing.push("TWILIO_AUTH_TOKEN");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Missing(missing))
    }
}

fn validate_transfer(config: &ServerConfig) -> Result<(), ConfigError> {
    if !is_e164(&config.transfer_number) {
        return Err(ConfigError::InvalidValue {
            key: "TRANSFER_NUMBER".to_string(),
            value: config.transfer_number.clone(),
            message: "expected an E.164 number such as +15551234567".to_string(),
        });
    }
    if config.transfer_tool_name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "transfer tool name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_relay(config: &ServerConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.silence_threshold) {
        return Err(ConfigError::InvalidValue {
            key: "SILENCE_THRESHOLD".to_string(),
            value: config.silence_threshold.to_string(),
            message: "must be between 0.0 and 1.0".to_string(),
        });
    }

    let positive = [
        ("OUTBOUND_QUEUE_CAPACITY", config.outbound_queue_capacity as u64),
        ("MODEL_SEND_QUEUE_CAPACITY", config.model_send_queue_capacity as u64),
        ("MODEL_CONNECT_TIMEOUT_MS", config.model_connect_timeout_ms),
        ("SESSION_IDLE_TIMEOUT_MS", config.session_idle_timeout_ms),
        ("START_TIMEOUT_MS", config.start_timeout_ms),
    ];
    for (key, value) in positive {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
    }

    Ok(())
}
