use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, ServerConfig, TlsConfig};

/// Read a non-empty environment variable.
fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Read and parse an environment variable, if set.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn set_string(target: &mut String, key: &str) {
    if let Some(value) = env_string(key) {
        *target = value;
    }
}

fn set_parsed<T>(target: &mut T, key: &str) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parse(key)? {
        *target = value;
    }
    Ok(())
}

/// Overlay environment variables onto `config`.
pub(super) fn load(mut config: ServerConfig) -> Result<ServerConfig, ConfigError> {
    set_string(&mut config.host, "HOST");
    set_parsed(&mut config.port, "PORT")?;

    match (env_string("TLS_CERT_PATH"), env_string("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => {
            config.tls = Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            });
        }
        (None, None) => {}
        _ => {
            return Err(ConfigError::Invalid(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
            ));
        }
    }

    set_string(&mut config.gemini_api_key, "GEMINI_API_KEY");
    set_string(&mut config.gemini_model, "GEMINI_MODEL");
    set_string(&mut config.gemini_endpoint, "GEMINI_ENDPOINT");
    if let Some(voice) = env_string("GEMINI_VOICE") {
        config.gemini_voice = Some(voice);
    }
    set_string(&mut config.system_instruction, "SYSTEM_INSTRUCTION");

    set_string(&mut config.twilio_account_sid, "TWILIO_ACCOUNT_SID");
    set_string(&mut config.twilio_auth_token, "TWILIO_AUTH_TOKEN");
    set_string(&mut config.twilio_api_base, "TWILIO_API_BASE");

    set_string(&mut config.transfer_tool_name, "TRANSFER_TOOL_NAME");
    set_string(&mut config.transfer_number, "TRANSFER_NUMBER");
    set_string(&mut config.transfer_announcement, "TRANSFER_ANNOUNCEMENT");

    set_parsed(&mut config.silence_threshold, "SILENCE_THRESHOLD")?;
    set_parsed(&mut config.caller_idle_timeout_ms, "CALLER_IDLE_TIMEOUT_MS")?;
    set_parsed(&mut config.outbound_queue_capacity, "OUTBOUND_QUEUE_CAPACITY")?;
    set_parsed(&mut config.model_send_queue_capacity, "MODEL_SEND_QUEUE_CAPACITY")?;
    set_parsed(&mut config.model_connect_timeout_ms, "MODEL_CONNECT_TIMEOUT_MS")?;
    set_parsed(&mut config.stream_error_threshold, "STREAM_ERROR_THRESHOLD")?;
    set_parsed(&mut config.session_idle_timeout_ms, "SESSION_IDLE_TIMEOUT_MS")?;
    set_parsed(&mut config.start_timeout_ms, "START_TIMEOUT_MS")?;

    // One retry budget from the environment; YAML can split model and handoff.
    for retry in [&mut config.model_retry, &mut config.handoff_retry] {
        set_parsed(&mut retry.max_attempts, "RETRY_MAX_ATTEMPTS")?;
        set_parsed(&mut retry.initial_delay_ms, "RETRY_INITIAL_DELAY_MS")?;
        set_parsed(&mut retry.max_delay_ms, "RETRY_MAX_DELAY_MS")?;
    }

    Ok(config)
}
