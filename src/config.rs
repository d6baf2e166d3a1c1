//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_ prefix, plus HOST/PORT/PUBLIC_HOST and
//!    the *_API_KEY credential variables)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## Sections:
//! - **server**: bind address and the public hostname advertised to the
//!   telephony platform in stream-connect instructions
//! - **services**: endpoints, credentials, and models for the external
//!   transcription, reply-generation, and synthesis services
//! - **audio**: telephony line format and the busy-frame policy of the
//!   turn-taking machine
//! - **performance**: concurrent-call limits

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub services: ServicesConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`/`port`: bind address for the HTTP/WebSocket server
/// - `public_host`: hostname (and optional port) the telephony platform can
///   reach; used to build the `wss://` stream URL in call-setup responses.
///   Behind a tunnel or load balancer this differs from the bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_host: String,
}

/// External speech/language service configuration.
///
/// Each service is OpenAI-compatible and optional: when an API key is not
/// configured the corresponding placeholder backend is used instead, so the
/// bridge stays runnable end-to-end in development.
///
/// ## Fields:
/// - `stt_url` / `stt_api_key` / `stt_model`: transcription service
///   (`{stt_url}/audio/transcriptions`)
/// - `llm_url` / `llm_api_key` / `llm_model`: reply generation
///   (`{llm_url}/chat/completions`)
/// - `tts_url` / `tts_api_key` / `tts_model` / `tts_voice`: speech synthesis
///   (`{tts_url}/audio/speech`)
/// - `system_prompt`: instruction prepended to the dialogue history on every
///   reply request
/// - `request_timeout_secs`: bound on every individual service call; a
///   timeout counts as that service's failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub stt_url: String,
    pub stt_api_key: Option<String>,
    pub stt_model: String,
    pub llm_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub tts_url: String,
    pub tts_api_key: Option<String>,
    pub tts_model: String,
    pub tts_voice: String,
    pub system_prompt: String,
    pub request_timeout_secs: u64,
}

/// Telephony audio and turn-taking configuration.
///
/// ## Fields:
/// - `telephony_sample_rate`: line rate of the platform's compressed audio
///   (8000 Hz for standard telephony; informational, the codec is fixed)
/// - `busy_policy`: what to do with caller audio that arrives while a turn
///   is already processing: `"drop"` (bounded latency, reference behavior)
///   or `"queue"` (process after the current turn)
/// - `max_queued_frames`: queue bound when `busy_policy = "queue"`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub telephony_sample_rate: u32,
    pub busy_policy: String,
    pub max_queued_frames: usize,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_calls`: maximum number of live call sessions; further
///   stream connections are refused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_calls: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                public_host: "localhost:8080".to_string(),
            },
            services: ServicesConfig {
                stt_url: "https://api.openai.com/v1".to_string(),
                stt_api_key: None,
                stt_model: "whisper-1".to_string(),
                llm_url: "https://api.openai.com/v1".to_string(),
                llm_api_key: None,
                llm_model: "gpt-4o-mini".to_string(),
                tts_url: "https://api.openai.com/v1".to_string(),
                tts_api_key: None,
                tts_model: "tts-1".to_string(),
                tts_voice: "alloy".to_string(),
                system_prompt: "You are a helpful voice assistant on a phone call. \
                                Keep replies short and conversational."
                    .to_string(),
                request_timeout_secs: 30,
            },
            audio: AudioConfig {
                telephony_sample_rate: 8000,
                busy_policy: "drop".to_string(),
                max_queued_frames: 8,
            },
            performance: PerformanceConfig {
                max_concurrent_calls: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `HOST=0.0.0.0` / `PORT=3000`: deployment platform overrides
    /// - `PUBLIC_HOST=bridge.example.com`: public stream host
    /// - `STT_API_KEY` / `LLM_API_KEY` / `TTS_API_KEY`: service credentials
    ///   (credentials only come from the environment, never from files)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject HOST/PORT without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(public_host) = env::var("PUBLIC_HOST") {
            settings = settings.set_override("server.public_host", public_host)?;
        }

        // Service credentials are dedicated variables so they stay out of
        // config files entirely
        if let Ok(key) = env::var("STT_API_KEY") {
            settings = settings.set_override("services.stt_api_key", key)?;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            settings = settings.set_override("services.llm_api_key", key)?;
        }

        if let Ok(key) = env::var("TTS_API_KEY") {
            settings = settings.set_override("services.tts_api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Public host is not empty (the platform could never connect back)
    /// - Busy policy is one of the two supported values
    /// - Concurrent-call limit and adapter timeout are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.public_host.trim().is_empty() {
            return Err(anyhow::anyhow!("Public host must not be empty"));
        }

        if self.audio.busy_policy != "drop" && self.audio.busy_policy != "queue" {
            return Err(anyhow::anyhow!(
                "Busy policy must be 'drop' or 'queue', got '{}'",
                self.audio.busy_policy
            ));
        }

        if self.audio.busy_policy == "queue" && self.audio.max_queued_frames == 0 {
            return Err(anyhow::anyhow!(
                "max_queued_frames must be greater than 0 when busy_policy is 'queue'"
            ));
        }

        if self.performance.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent calls must be greater than 0"
            ));
        }

        if self.services.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "Service request timeout must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only fields present in the JSON are changed. Credentials are
    /// deliberately not updatable at runtime; they come from the
    /// environment at startup.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
            if let Some(public_host) = server.get("public_host").and_then(|v| v.as_str()) {
                self.server.public_host = public_host.to_string();
            }
        }

        if let Some(services) = partial_config.get("services") {
            if let Some(model) = services.get("stt_model").and_then(|v| v.as_str()) {
                self.services.stt_model = model.to_string();
            }
            if let Some(model) = services.get("llm_model").and_then(|v| v.as_str()) {
                self.services.llm_model = model.to_string();
            }
            if let Some(model) = services.get("tts_model").and_then(|v| v.as_str()) {
                self.services.tts_model = model.to_string();
            }
            if let Some(voice) = services.get("tts_voice").and_then(|v| v.as_str()) {
                self.services.tts_voice = voice.to_string();
            }
            if let Some(prompt) = services.get("system_prompt").and_then(|v| v.as_str()) {
                self.services.system_prompt = prompt.to_string();
            }
            if let Some(timeout) = services
                .get("request_timeout_secs")
                .and_then(|v| v.as_u64())
            {
                self.services.request_timeout_secs = timeout;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(policy) = audio.get("busy_policy").and_then(|v| v.as_str()) {
                self.audio.busy_policy = policy.to_string();
            }
            if let Some(frames) = audio.get("max_queued_frames").and_then(|v| v.as_u64()) {
                self.audio.max_queued_frames = frames as usize;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(calls) = performance
                .get("max_concurrent_calls")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_calls = calls as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration must be valid and runnable as-is.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.busy_policy, "drop");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.busy_policy = "buffer".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.busy_policy = "queue".to_string();
        config.audio.max_queued_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"busy_policy": "queue"}, "server": {"port": 9090}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.audio.busy_policy, "queue");
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
    }

    /// Updates that would produce an invalid configuration are rejected.
    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"busy_policy": "nonsense"}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
