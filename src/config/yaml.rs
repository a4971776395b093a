use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// live:
///   url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent"
///   api_key: "your-api-key"
///   model: "models/gemini-live-2.5-flash-preview"
///   voice: "Aoede"
///   response_modality: "audio"
///   system_instruction: "You are a helpful banking assistant."
///   greeting: "Hello"
///   setup_timeout_ms: 30000
///
/// audio:
///   input_device: "MacBook Pro Microphone"
///   output_device: "MacBook Pro Speakers"
///   playback_volume: 0.8
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub live: Option<LiveYaml>,
    pub audio: Option<AudioYaml>,
}

/// Live session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LiveYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub response_modality: Option<String>,
    pub system_instruction: Option<String>,
    pub greeting: Option<String>,
    pub setup_timeout_ms: Option<u64>,
}

/// Audio device configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub playback_volume: Option<f32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
live:
  url: "ws://127.0.0.1:9000/ws"
  api_key: "yaml-key"
  model: "models/custom"
  voice: "Puck"
  response_modality: "text"
  system_instruction: "Be brief."
  greeting: "Hi there"
  setup_timeout_ms: 5000

audio:
  input_device: "USB Mic"
  output_device: "Headphones"
  playback_volume: 0.5
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let live = config.live.unwrap();
        assert_eq!(live.url.as_deref(), Some("ws://127.0.0.1:9000/ws"));
        assert_eq!(live.api_key.as_deref(), Some("yaml-key"));
        assert_eq!(live.voice.as_deref(), Some("Puck"));
        assert_eq!(live.setup_timeout_ms, Some(5000));

        let audio = config.audio.unwrap();
        assert_eq!(audio.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(audio.playback_volume, Some(0.5));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config: YamlConfig = serde_yaml::from_str("live:\n  model: \"models/x\"\n").unwrap();
        let live = config.live.unwrap();
        assert_eq!(live.model.as_deref(), Some("models/x"));
        assert!(live.api_key.is_none());
        assert!(config.audio.is_none());
    }

    #[test]
    fn test_yaml_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "audio:\n  playback_volume: 0.25\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(config.audio.unwrap().playback_volume, Some(0.25));
    }

    #[test]
    fn test_yaml_from_file_missing() {
        let result = YamlConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_yaml_invalid_type() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "live:\n  setup_timeout_ms: \"soon\"\n").unwrap();

        assert!(matches!(
            YamlConfig::from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
