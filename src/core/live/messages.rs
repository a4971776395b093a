//! Live API WebSocket message types.
//!
//! All frames are JSON objects with exactly one top-level key naming the
//! message.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Session configuration, first message on every connection
//! - realtimeInput - Streaming media chunks (microphone audio)
//! - clientContent - Conversation turns (text)
//! - toolResponse - Results of function calls requested by the model
//!
//! Server messages (received from server):
//! - setupComplete - Setup acknowledged
//! - serverContent - Model turn parts, interruption and turn completion flags
//! - toolCall - Function calls requested by the model
//! - toolCallCancellation - Previously requested calls that should be dropped

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent in the `setup` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Model resource name (e.g. `models/gemini-live-2.5-flash-preview`)
    pub model: String,

    /// Generation options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// System instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,

    /// Tool declarations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

impl LiveConfig {
    /// Create a config for `model` with no options.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the response modality.
    pub fn with_response_modality(mut self, modality: ResponseModality) -> Self {
        self.generation_config
            .get_or_insert_with(GenerationConfig::default)
            .response_modalities = Some(modality);
        self
    }

    /// Select a prebuilt voice.
    pub fn with_voice(mut self, voice_name: impl Into<String>) -> Self {
        self.generation_config
            .get_or_insert_with(GenerationConfig::default)
            .speech_config = Some(SpeechConfig::prebuilt(voice_name));
        self
    }

    /// Set the system instruction text.
    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(SystemInstruction {
            parts: vec![Part::text(text)],
        });
        self
    }

    /// Add function declarations as one tool entry.
    pub fn with_functions(mut self, declarations: Vec<FunctionDeclaration>) -> Self {
        self.tools.get_or_insert_with(Vec::new).push(Tool {
            function_declarations: declarations,
        });
        self
    }

    /// Overlay `self` on `base`: fields present in `self` win, absent fields
    /// are taken from `base`. The merge is shallow.
    pub fn merged_over(self, base: &LiveConfig) -> LiveConfig {
        LiveConfig {
            model: if self.model.is_empty() {
                base.model.clone()
            } else {
                self.model
            },
            generation_config: self
                .generation_config
                .or_else(|| base.generation_config.clone()),
            system_instruction: self
                .system_instruction
                .or_else(|| base.system_instruction.clone()),
            tools: self.tools.or_else(|| base.tools.clone()),
        }
    }

    /// Name of the configured prebuilt voice, if any.
    pub fn voice_name(&self) -> Option<&str> {
        self.generation_config
            .as_ref()?
            .speech_config
            .as_ref()?
            .voice_config
            .as_ref()?
            .prebuilt_voice_config
            .as_ref()
            .map(|v| v.voice_name.as_str())
    }
}

/// Generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Response modality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<ResponseModality>,

    /// Speech synthesis options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Modality of model responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    /// Spoken audio
    #[default]
    Audio,
    /// Text only
    Text,
}

impl ResponseModality {
    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "text" => Self::Text,
            _ => Self::Audio,
        }
    }
}

/// Speech synthesis options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

impl SpeechConfig {
    /// Speech config selecting a prebuilt voice.
    pub fn prebuilt(voice_name: impl Into<String>) -> Self {
        Self {
            voice_config: Some(VoiceConfig {
                prebuilt_voice_config: Some(PrebuiltVoiceConfig {
                    voice_name: voice_name.into(),
                }),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prebuilt_voice_config: Option<PrebuiltVoiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// System instruction content (no role).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInstruction {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Tool entry carrying function declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Function declaration for tool calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Content
// =============================================================================

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Speaker role (`user` or `model`)
    pub role: String,
    /// Content parts
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A user turn.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }
}

/// A piece of content: text, inline media, or a shape this client does not
/// interpret (kept verbatim in `extra`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline media (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,

    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Part {
    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// An inline media part.
    pub fn inline(blob: Blob) -> Self {
        Self {
            inline_data: Some(blob),
            ..Default::default()
        }
    }

    /// Whether this part carries raw PCM audio.
    pub fn is_pcm_audio(&self) -> bool {
        self.inline_data
            .as_ref()
            .is_some_and(|blob| blob.mime_type.starts_with("audio/pcm"))
    }
}

/// Base64-encoded media with its mime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Mime type (e.g. `audio/pcm;rate=16000`)
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

impl Blob {
    /// Wrap raw PCM16 little-endian bytes at `sample_rate`.
    pub fn pcm16(data: &[u8], sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            data: BASE64_STANDARD.encode(data),
        }
    }

    /// Wrap already base64-encoded PCM16 at `sample_rate`.
    pub fn pcm16_base64(data: String, sample_rate: u32) -> Self {
        Self {
            mime_type: pcm_mime_type(sample_rate),
            data,
        }
    }

    /// Decode the base64 payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.data)
    }
}

/// Mime type for raw PCM16 at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

// =============================================================================
// Client Messages (sent to server)
// =============================================================================

/// Body of a `realtimeInput` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Body of a `clientContent` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Body of a `toolResponse` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Result of one function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Arbitrary JSON result
    pub response: serde_json::Value,
    /// Call ID from the matching [`FunctionCall`]
    pub id: String,
}

/// Wire envelope for outbound messages. Serializes as `{"<key>": body}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage<'a> {
    Setup(&'a LiveConfig),
    RealtimeInput(&'a RealtimeInput),
    ClientContent(&'a ClientContent),
    ToolResponse(&'a ToolResponse),
}

// =============================================================================
// Server Messages (received from server)
// =============================================================================

/// Body of a `serverContent` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    /// Model output for this frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    /// The model was interrupted by user activity
    pub interrupted: bool,
    /// The model finished its turn
    pub turn_complete: bool,
}

/// Model turn parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Body of a `toolCall` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCall {
    pub function_calls: Vec<FunctionCall>,
}

/// Function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Call ID, echoed in the [`FunctionResponse`]
    pub id: String,
    /// JSON arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

/// Body of a `toolCallCancellation` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallCancellation {
    pub ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_config_serializes_camel_case() {
        let config = LiveConfig::new("models/test")
            .with_response_modality(ResponseModality::Audio)
            .with_voice("Aoede")
            .with_system_instruction("be brief");

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "models/test",
                "generationConfig": {
                    "responseModalities": "audio",
                    "speechConfig": {
                        "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Aoede" } }
                    }
                },
                "systemInstruction": { "parts": [{ "text": "be brief" }] }
            })
        );
    }

    #[test]
    fn test_minimal_config_omits_optional_fields() {
        let value = serde_json::to_value(LiveConfig::new("models/x")).unwrap();
        assert_eq!(value, json!({ "model": "models/x" }));
    }

    #[test]
    fn test_merged_over_prefers_present_fields() {
        let base = LiveConfig::new("models/base")
            .with_voice("Aoede")
            .with_system_instruction("base prompt");
        let update = LiveConfig::new("").with_system_instruction("new prompt");

        let merged = update.merged_over(&base);
        assert_eq!(merged.model, "models/base");
        assert_eq!(merged.voice_name(), Some("Aoede"));
        assert_eq!(
            merged.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("new prompt")
        );
    }

    #[test]
    fn test_part_keeps_unknown_fields() {
        let part: Part = serde_json::from_value(json!({
            "executableCode": { "language": "PYTHON", "code": "print(1)" }
        }))
        .unwrap();
        assert!(part.text.is_none());
        assert!(part.extra.contains_key("executableCode"));

        let back = serde_json::to_value(&part).unwrap();
        assert_eq!(back["executableCode"]["code"], "print(1)");
    }

    #[test]
    fn test_is_pcm_audio() {
        assert!(Part::inline(Blob::pcm16(&[0, 0], 24000)).is_pcm_audio());
        assert!(!Part::text("hi").is_pcm_audio());
        let image = Part::inline(Blob {
            mime_type: "image/jpeg".to_string(),
            data: String::new(),
        });
        assert!(!image.is_pcm_audio());
    }

    #[test]
    fn test_response_modality_parsing() {
        assert_eq!(
            ResponseModality::from_str_or_default("TEXT"),
            ResponseModality::Text
        );
        assert_eq!(
            ResponseModality::from_str_or_default("audio"),
            ResponseModality::Audio
        );
        assert_eq!(
            ResponseModality::from_str_or_default("video"),
            ResponseModality::Audio
        );
    }

    #[test]
    fn test_with_functions_declares_tool() {
        let config = LiveConfig::new("models/x").with_functions(vec![FunctionDeclaration {
            name: "get_rate".to_string(),
            description: Some("Current deposit rate".to_string()),
            parameters: None,
        }]);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value["tools"][0]["functionDeclarations"][0]["name"],
            "get_rate"
        );
    }
}
