use serde::Deserialize;
use std::path::PathBuf;

use super::{ConfigError, ServerConfig, TlsConfig};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     cert_path: "/etc/voxbridge/cert.pem"
///     key_path: "/etc/voxbridge/key.pem"
///
/// gemini:
///   api_key: "your-gemini-key"
///   model: "gemini-2.5-flash-native-audio-preview-12-2025"
///   voice: "Puck"
///   system_instruction: "You are a helpful customer support AI."
///
/// twilio:
///   account_sid: "ACxxxxxxxx"
///   auth_token: "your-auth-token"
///
/// handoff:
///   tool_name: "transfer_to_human"
///   transfer_number: "+15551234567"
///   announcement: "Please hold while I connect you to a human agent."
///   retry:
///     max_attempts: 3
///     initial_delay_ms: 250
///
/// relay:
///   silence_threshold: 0.02
///   caller_idle_timeout_ms: 800
///   outbound_queue_capacity: 500
///   model_send_queue_capacity: 50
///   model_connect_timeout_ms: 10000
///   stream_error_threshold: 5
///   session_idle_timeout_ms: 30000
///   start_timeout_ms: 10000
///   retry:
///     max_attempts: 3
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub gemini: Option<GeminiYaml>,
    pub twilio: Option<TwilioYaml>,
    pub handoff: Option<HandoffYaml>,
    pub relay: Option<RelayYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TwilioYaml {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub api_base: Option<String>,
}

/// Retry overrides; unset fields keep their current value.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetryYaml {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f32>,
    pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HandoffYaml {
    pub tool_name: Option<String>,
    pub transfer_number: Option<String>,
    pub announcement: Option<String>,
    pub retry: Option<RetryYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub silence_threshold: Option<f32>,
    pub caller_idle_timeout_ms: Option<u64>,
    pub outbound_queue_capacity: Option<usize>,
    pub model_send_queue_capacity: Option<usize>,
    pub model_connect_timeout_ms: Option<u64>,
    pub stream_error_threshold: Option<u64>,
    pub session_idle_timeout_ms: Option<u64>,
    pub start_timeout_ms: Option<u64>,
    pub retry: Option<RetryYaml>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl RetryYaml {
    fn apply(self, retry: &mut crate::core::retry::RetryPolicy) {
        set(&mut retry.max_attempts, self.max_attempts);
        set(&mut retry.initial_delay_ms, self.initial_delay_ms);
        set(&mut retry.max_delay_ms, self.max_delay_ms);
        set(&mut retry.backoff_multiplier, self.backoff_multiplier);
        set(&mut retry.jitter, self.jitter);
    }
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override `config` with every value present in the file.
    pub fn apply(self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(server) = self.server {
            set(&mut config.host, server.host);
            set(&mut config.port, server.port);
            if let Some(tls) = server.tls {
                match (tls.cert_path, tls.key_path) {
                    (Some(cert), Some(key)) => {
                        config.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        });
                    }
                    (None, None) => {}
                    _ => {
                        return Err(ConfigError::Invalid(
                            "server.tls requires both cert_path and key_path".to_string(),
                        ));
                    }
                }
            }
        }

        if let Some(gemini) = self.gemini {
            set(&mut config.gemini_api_key, gemini.api_key);
            set(&mut config.gemini_model, gemini.model);
            set(&mut config.gemini_endpoint, gemini.endpoint);
            if gemini.voice.is_some() {
                config.gemini_voice = gemini.voice;
            }
            set(&mut config.system_instruction, gemini.system_instruction);
        }

        if let Some(twilio) = self.twilio {
            set(&mut config.twilio_account_sid, twilio.account_sid);
            set(&mut config.twilio_auth_token, twilio.auth_token);
            set(&mut config.twilio_api_base, twilio.api_base);
        }

        if let Some(handoff) = self.handoff {
            set(&mut config.transfer_tool_name, handoff.tool_name);
            set(&mut config.transfer_number, handoff.transfer_number);
            set(&mut config.transfer_announcement, handoff.announcement);
            if let Some(retry) = handoff.retry {
                retry.apply(&mut config.handoff_retry);
            }
        }

        if let Some(relay) = self.relay {
            set(&mut config.silence_threshold, relay.silence_threshold);
            set(&mut config.caller_idle_timeout_ms, relay.caller_idle_timeout_ms);
            set(&mut config.outbound_queue_capacity, relay.outbound_queue_capacity);
            set(&mut config.model_send_queue_capacity, relay.model_send_queue_capacity);
            set(&mut config.model_connect_timeout_ms, relay.model_connect_timeout_ms);
            set(&mut config.stream_error_threshold, relay.stream_error_threshold);
            set(&mut config.session_idle_timeout_ms, relay.session_idle_timeout_ms);
            set(&mut config.start_timeout_ms, relay.start_timeout_ms);
            if let Some(retry) = relay.retry {
                retry.apply(&mut config.model_retry);
            }
        }

        Ok(())
    }
}
