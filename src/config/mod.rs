//! Configuration module for the voxbridge server
//!
//! Configuration comes from environment variables (with `.env` loaded in
//! `main`) and an optional YAML file. Priority: YAML > ENV vars > .env values >
//! defaults. Startup fails fast when a critical credential is missing.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading and overrides
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voxbridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::handoff::{
    DEFAULT_ANNOUNCEMENT, DEFAULT_TRANSFER_NUMBER, HandoffConfig, TRANSFER_TOOL_NAME,
    TWILIO_API_BASE, transfer_tool_declaration,
};
use crate::core::model::gemini::{DEFAULT_GEMINI_MODEL, DEFAULT_SYSTEM_INSTRUCTION, GEMINI_LIVE_URL};
use crate::core::model::{GeminiLiveConfig, ModelClientConfig};
use crate::core::retry::RetryPolicy;
use crate::core::session::DuplexConfig;
use crate::core::telephony::BridgeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: '{value}' ({message})")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Everything needed to run the relay:
/// - Server settings (host, port, TLS)
/// - Gemini Live credentials and session setup
/// - Twilio credentials for call control
/// - Handoff behaviour (tool name, destination, announcement)
/// - Floor, queue and timeout tunables for each call
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Gemini Live
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    /// Prebuilt voice name; provider default when unset
    pub gemini_voice: Option<String>,
    pub system_instruction: String,

    // Twilio
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_api_base: String,

    // Handoff
    pub transfer_tool_name: String,
    /// E.164 destination dialed when the model names none
    pub transfer_number: String,
    /// Spoken to the caller before dialing
    pub transfer_announcement: String,
    pub handoff_retry: RetryPolicy,

    // Per-call relay tunables
    /// Normalized RMS at or below which caller audio counts as silence
    pub silence_threshold: f32,
    pub caller_idle_timeout_ms: u64,
    pub outbound_queue_capacity: usize,
    pub model_send_queue_capacity: usize,
    pub model_connect_timeout_ms: u64,
    pub stream_error_threshold: u64,
    pub model_retry: RetryPolicy,
    pub session_idle_timeout_ms: u64,
    pub start_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let duplex = DuplexConfig::default();
        let model = ModelClientConfig::default();
        let bridge = BridgeConfig::default();

        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_endpoint: GEMINI_LIVE_URL.to_string(),
            gemini_voice: None,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_api_base: TWILIO_API_BASE.to_string(),
            transfer_tool_name: TRANSFER_TOOL_NAME.to_string(),
            transfer_number: DEFAULT_TRANSFER_NUMBER.to_string(),
            transfer_announcement: DEFAULT_ANNOUNCEMENT.to_string(),
            handoff_retry: RetryPolicy::default(),
            silence_threshold: duplex.silence_threshold,
            caller_idle_timeout_ms: duplex.caller_idle_timeout.as_millis() as u64,
            outbound_queue_capacity: duplex.outbound_queue_capacity,
            model_send_queue_capacity: model.send_queue_capacity,
            model_connect_timeout_ms: model.connect_timeout.as_millis() as u64,
            stream_error_threshold: model.stream_error_threshold,
            model_retry: model.retry,
            session_idle_timeout_ms: bridge.session_idle_timeout.as_millis() as u64,
            start_timeout_ms: bridge.start_timeout.as_millis() as u64,
        }
    }
}

/// Implement Drop to zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.gemini_api_key.zeroize();
        self.twilio_auth_token.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// `.env` values are expected to be loaded into the environment already
    /// (see `main`). Missing optional values fall back to defaults; missing
    /// credentials fail validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load(Self::default())?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After merging, the final configuration is validated.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = env::load(Self::default())?;
        yaml_config.apply(&mut config)?;

        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn duplex_config(&self) -> DuplexConfig {
        DuplexConfig {
            silence_threshold: self.silence_threshold,
            caller_idle_timeout: Duration::from_millis(self.caller_idle_timeout_ms),
            outbound_queue_capacity: self.outbound_queue_capacity,
        }
    }

    pub fn model_client_config(&self) -> ModelClientConfig {
        ModelClientConfig {
            connect_timeout: Duration::from_millis(self.model_connect_timeout_ms),
            retry: self.model_retry.clone(),
            stream_error_threshold: self.stream_error_threshold,
            send_queue_capacity: self.model_send_queue_capacity,
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            session_idle_timeout: Duration::from_millis(self.session_idle_timeout_ms),
            ..Default::default()
        }
    }

    pub fn handoff_config(&self) -> HandoffConfig {
        HandoffConfig {
            tool_name: self.transfer_tool_name.clone(),
            default_target: self.transfer_number.clone(),
            announcement: self.transfer_announcement.clone(),
            retry: self.handoff_retry.clone(),
        }
    }

    /// Gemini session setup, including the transfer tool declaration.
    pub fn gemini_config(&self) -> GeminiLiveConfig {
        GeminiLiveConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            endpoint: self.gemini_endpoint.clone(),
            system_instruction: self.system_instruction.clone(),
            voice: self.gemini_voice.clone(),
            tools: vec![transfer_tool_declaration(&self.transfer_tool_name)],
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) const ENV_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "TLS_CERT_PATH",
        "TLS_KEY_PATH",
        "GEMINI_API_KEY",
        "GEMINI_MODEL",
        "GEMINI_ENDPOINT",
        "GEMINI_VOICE",
        "SYSTEM_INSTRUCTION",
        "TWILIO_ACCOUNT_SID",
        "TWILIO_AUTH_TOKEN",
        "TWILIO_API_BASE",
        "TRANSFER_TOOL_NAME",
        "TRANSFER_NUMBER",
        "TRANSFER_ANNOUNCEMENT",
        "SILENCE_THRESHOLD",
        "CALLER_IDLE_TIMEOUT_MS",
        "OUTBOUND_QUEUE_CAPACITY",
        "MODEL_SEND_QUEUE_CAPACITY",
        "MODEL_CONNECT_TIMEOUT_MS",
        "STREAM_ERROR_THRESHOLD",
        "SESSION_IDLE_TIMEOUT_MS",
        "START_TIMEOUT_MS",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_INITIAL_DELAY_MS",
        "RETRY_MAX_DELAY_MS",
    ];

    pub(crate) fn cleanup_env_vars() {
        // SAFETY: tests touching the environment run under #[serial].
        unsafe {
            for var in ENV_VARS {
                std::env::remove_var(var);
            }
        }
    }

    pub(crate) fn set_credentials() {
        // SAFETY: tests touching the environment run under #[serial].
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "env-gemini-key");
            std::env::set_var("TWILIO_ACCOUNT_SID", "AC-env");
            std::env::set_var("TWILIO_AUTH_TOKEN", "env-token");
        }
    }

    #[test]
    fn test_default_component_configs() {
        let config = ServerConfig::default();

        let duplex = config.duplex_config();
        assert_eq!(duplex.silence_threshold, 0.02);
        assert_eq!(duplex.caller_idle_timeout, Duration::from_millis(800));
        assert_eq!(duplex.outbound_queue_capacity, 500);

        let model = config.model_client_config();
        assert_eq!(model.connect_timeout, Duration::from_secs(10));
        assert_eq!(model.send_queue_capacity, 50);
        assert_eq!(model.stream_error_threshold, 5);

        let handoff = config.handoff_config();
        assert_eq!(handoff.tool_name, "transfer_to_human");
        assert_eq!(handoff.default_target, "+1234567890");
        assert_eq!(handoff.retry.max_attempts, 3);
    }

    #[test]
    fn test_gemini_config_declares_transfer_tool() {
        let mut config = ServerConfig::default();
        config.gemini_api_key = "key".to_string();
        config.transfer_tool_name = "escalate".to_string();
        config.gemini_voice = Some("Puck".to_string());

        let gemini = config.gemini_config();
        assert_eq!(gemini.api_key, "key");
        assert_eq!(gemini.voice.as_deref(), Some("Puck"));
        assert_eq!(gemini.tools.len(), 1);
        assert_eq!(gemini.tools[0].name, "escalate");
    }

    #[test]
    fn test_address_and_tls() {
        let mut config = ServerConfig::default();
        config.host = "127.0.0.1".to_string();
        config.port = 8080;
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert!(!config.is_tls_enabled());

        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from("/tmp/cert.pem"),
            key_path: PathBuf::from("/tmp/key.pem"),
        });
        assert!(config.is_tls_enabled());
    }

    #[test]
    #[serial]
    fn test_from_env_requires_credentials() {
        cleanup_env_vars();

        let err = ServerConfig::from_env().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("GEMINI_API_KEY"), "{message}");
        assert!(message.contains("TWILIO_ACCOUNT_SID"), "{message}");
        assert!(message.contains("TWILIO_AUTH_TOKEN"), "{message}");
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        set_credentials();
        unsafe {
            std::env::set_var("HOST", "10.0.0.1");
            std::env::set_var("TRANSFER_NUMBER", "+15550000000");
        }

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
server:
  host: "127.0.0.1"
  port: 8080

handoff:
  transfer_number: "+15551234567"
  retry:
    max_attempts: 5

relay:
  silence_threshold: 0.05
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.transfer_number, "+15551234567");
        assert_eq!(config.handoff_retry.max_attempts, 5);
        assert_eq!(config.silence_threshold, 0.05);
        // ENV value
        assert_eq!(config.gemini_api_key, "env-gemini-key");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ServerConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_invalid_transfer_number() {
        cleanup_env_vars();
        set_credentials();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "handoff:\n  transfer_number: \"555-1234\"\n").unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("555-1234"));

        cleanup_env_vars();
    }
}
