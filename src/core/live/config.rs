//! Gemini Live API configuration types.
//!
//! This module contains configuration types for the Gemini Live API:
//! - Endpoint and default model
//! - Prebuilt voice selection
//! - Audio sample rates

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::messages::{LiveConfig, ResponseModality};

/// Gemini Live `BidiGenerateContent` WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Default live model.
pub const DEFAULT_MODEL: &str = "models/gemini-live-2.5-flash-preview";

/// Sample rate of microphone audio sent to the service.
pub const LIVE_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio returned by the service.
pub const LIVE_OUTPUT_SAMPLE_RATE: u32 = 24000;

// =============================================================================
// Voices
// =============================================================================

/// Prebuilt voices available for audio responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrebuiltVoice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    /// Aoede voice (default)
    #[default]
    Aoede,
}

impl PrebuiltVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Puck => "Puck",
            Self::Charon => "Charon",
            Self::Kore => "Kore",
            Self::Fenrir => "Fenrir",
            Self::Aoede => "Aoede",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "puck" => Self::Puck,
            "charon" => Self::Charon,
            "kore" => Self::Kore,
            "fenrir" => Self::Fenrir,
            "aoede" => Self::Aoede,
            _ => Self::default(),
        }
    }

    /// Get all available voices.
    pub fn all() -> &'static [PrebuiltVoice] {
        &[
            Self::Puck,
            Self::Charon,
            Self::Kore,
            Self::Fenrir,
            Self::Aoede,
        ]
    }
}

impl std::fmt::Display for PrebuiltVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Base session configuration: default model, audio responses, default voice.
pub fn base_config() -> LiveConfig {
    LiveConfig::new(DEFAULT_MODEL)
        .with_response_modality(ResponseModality::Audio)
        .with_voice(PrebuiltVoice::default().as_str())
}

// =============================================================================
// Endpoint
// =============================================================================

/// Service endpoint plus the API key appended as the `key` query parameter.
#[derive(Clone)]
pub struct LiveEndpoint {
    /// Base WebSocket URL
    pub url: String,
    /// API key
    pub api_key: String,
}

impl LiveEndpoint {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    /// Endpoint for the public Gemini Live service.
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::new(GEMINI_LIVE_URL, api_key)
    }
}

impl std::fmt::Debug for LiveEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEndpoint")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Drop for LiveEndpoint {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_parsing() {
        assert_eq!(PrebuiltVoice::from_str_or_default("puck"), PrebuiltVoice::Puck);
        assert_eq!(PrebuiltVoice::from_str_or_default(" KORE "), PrebuiltVoice::Kore);
        assert_eq!(PrebuiltVoice::from_str_or_default("nobody"), PrebuiltVoice::Aoede);
        assert_eq!(PrebuiltVoice::all().len(), 5);
    }

    #[test]
    fn test_base_config() {
        let config = base_config();
        assert_eq!(config.model, "models/gemini-live-2.5-flash-preview");
        assert_eq!(config.voice_name(), Some("Aoede"));
        assert_eq!(
            config.generation_config.unwrap().response_modalities,
            Some(ResponseModality::Audio)
        );
    }

    #[test]
    fn test_endpoint_debug_redacts_key() {
        let endpoint = LiveEndpoint::gemini("secret-key");
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("generativelanguage.googleapis.com"));
    }
}
