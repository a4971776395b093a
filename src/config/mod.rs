//! Configuration module for the live voice client
//!
//! This module handles client configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment variables
//! - `LIVE_API_URL`: WebSocket endpoint (default: Gemini Live)
//! - `GEMINI_API_KEY` (or `LIVE_API_KEY`): API key, required
//! - `LIVE_MODEL`, `LIVE_VOICE`, `LIVE_RESPONSE_MODALITY`
//! - `LIVE_SYSTEM_INSTRUCTION`, `LIVE_GREETING`
//! - `LIVE_SETUP_TIMEOUT_MS`: setup handshake timeout, `0` waits forever
//! - `AUDIO_INPUT_DEVICE`, `AUDIO_OUTPUT_DEVICE`, `PLAYBACK_VOLUME`
//!
//! # Example
//! ```rust,no_run
//! use live_voice_client::config::ClientSettings;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let settings = ClientSettings::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let settings = ClientSettings::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Model: {}", settings.model);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::core::live::{
    DEFAULT_MODEL, DEFAULT_SETUP_TIMEOUT, GEMINI_LIVE_URL, LiveClientOptions, LiveConfig,
    LiveEndpoint, PrebuiltVoice, ResponseModality,
};
use crate::utils::endpoint::validate_endpoint_url;

mod yaml;

pub use yaml::{AudioYaml, LiveYaml, YamlConfig};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Client configuration
///
/// Contains everything needed to run a voice session:
/// - Live endpoint and API key
/// - Session defaults (model, voice, modality, system instruction, greeting)
/// - Audio device selection and playback volume
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: PrebuiltVoice,
    pub response_modality: ResponseModality,
    pub system_instruction: Option<String>,
    pub greeting: Option<String>,
    /// `None` waits for the setup acknowledgement indefinitely
    pub setup_timeout: Option<Duration>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub playback_volume: f32,
}

/// Implement Drop to zeroize the API key when ClientSettings is dropped.
impl Drop for ClientSettings {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.api_key.zeroize();
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: GEMINI_LIVE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: PrebuiltVoice::default(),
            response_modality: ResponseModality::default(),
            system_instruction: None,
            greeting: None,
            setup_timeout: Some(DEFAULT_SETUP_TIMEOUT),
            input_device: None,
            output_device: None,
            playback_volume: 1.0,
        }
    }
}

impl ClientSettings {
    /// Load configuration from environment variables.
    ///
    /// The .env file is loaded by the binary at startup, so its values are
    /// visible here as environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self::merge(None)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a YAML file, with environment variables filling
    /// anything the file leaves out.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let settings = Self::merge(Some(yaml_config))?;
        settings.validate()?;
        Ok(settings)
    }

    fn merge(yaml: Option<YamlConfig>) -> Result<Self, ConfigError> {
        let yaml = yaml.unwrap_or_default();
        let live = yaml.live.unwrap_or_default();
        let audio = yaml.audio.unwrap_or_default();
        let defaults = Self::default();

        let setup_timeout_ms = match live.setup_timeout_ms {
            Some(ms) => Some(ms),
            None => env_parse::<u64>("LIVE_SETUP_TIMEOUT_MS")?,
        };
        let setup_timeout = match setup_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.setup_timeout,
        };

        let playback_volume = match audio.playback_volume {
            Some(v) => v,
            None => env_parse::<f32>("PLAYBACK_VOLUME")?.unwrap_or(defaults.playback_volume),
        };

        Ok(Self {
            api_url: live
                .url
                .or_else(|| env_var("LIVE_API_URL"))
                .unwrap_or_else(|| defaults.api_url.clone()),
            api_key: live
                .api_key
                .or_else(|| env_var("GEMINI_API_KEY"))
                .or_else(|| env_var("LIVE_API_KEY"))
                .unwrap_or_default(),
            model: live
                .model
                .or_else(|| env_var("LIVE_MODEL"))
                .unwrap_or_else(|| defaults.model.clone()),
            voice: live
                .voice
                .or_else(|| env_var("LIVE_VOICE"))
                .map(|v| PrebuiltVoice::from_str_or_default(&v))
                .unwrap_or(defaults.voice),
            response_modality: live
                .response_modality
                .or_else(|| env_var("LIVE_RESPONSE_MODALITY"))
                .map(|m| ResponseModality::from_str_or_default(&m))
                .unwrap_or(defaults.response_modality),
            system_instruction: live
                .system_instruction
                .or_else(|| env_var("LIVE_SYSTEM_INSTRUCTION")),
            greeting: live.greeting.or_else(|| env_var("LIVE_GREETING")),
            setup_timeout,
            input_device: audio.input_device.or_else(|| env_var("AUDIO_INPUT_DEVICE")),
            output_device: audio.output_device.or_else(|| env_var("AUDIO_OUTPUT_DEVICE")),
            playback_volume,
        })
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("GEMINI_API_KEY"));
        }
        validate_endpoint_url(&self.api_url, true).map_err(|e| ConfigError::InvalidValue {
            key: "LIVE_API_URL",
            reason: e.to_string(),
        })?;
        if !(0.0..=1.0).contains(&self.playback_volume) {
            return Err(ConfigError::InvalidValue {
                key: "PLAYBACK_VOLUME",
                reason: format!("{} is outside [0, 1]", self.playback_volume),
            });
        }
        Ok(())
    }

    /// Endpoint for the live client.
    pub fn endpoint(&self) -> LiveEndpoint {
        LiveEndpoint::new(self.api_url.clone(), self.api_key.clone())
    }

    /// Client options derived from these settings.
    pub fn client_options(&self) -> LiveClientOptions {
        LiveClientOptions {
            setup_timeout: self.setup_timeout,
            ..Default::default()
        }
    }

    /// Session configuration for the first connection.
    pub fn live_config(&self) -> LiveConfig {
        let mut config = LiveConfig::new(self.model.clone())
            .with_response_modality(self.response_modality);
        if self.response_modality == ResponseModality::Audio {
            config = config.with_voice(self.voice.as_str());
        }
        if let Some(instruction) = &self.system_instruction {
            config = config.with_system_instruction(instruction.clone());
        }
        config
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key,
                reason: format!("'{raw}': {e}"),
            }),
        None => Ok(None),
    }
}
