//! Wire codec for the live protocol.
//!
//! Pure functions translating between typed intents/events and JSON frames.
//! Nothing here touches the network.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use super::messages::{
    Blob, ClientContent, ClientMessage, Content, LiveConfig, RealtimeInput, ServerContent,
    ToolCall, ToolCallCancellation, ToolResponse,
};

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Frame parsed as JSON but matches no known message
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    /// Frame is not valid UTF-8 JSON, or a known message has the wrong shape
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Outbound intent could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A raw inbound WebSocket data frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// A message the client wants to send.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundIntent {
    /// Session configuration
    Setup(LiveConfig),
    /// Streaming media chunks
    RealtimeInput(Vec<Blob>),
    /// Conversation turns
    ClientContent {
        turns: Vec<Content>,
        turn_complete: bool,
    },
    /// Function call results
    ToolResponse(ToolResponse),
}

impl OutboundIntent {
    /// Wire key of this intent, used in protocol traces.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundIntent::Setup(_) => "setup",
            OutboundIntent::RealtimeInput(_) => "realtimeInput",
            OutboundIntent::ClientContent { .. } => "clientContent",
            OutboundIntent::ToolResponse(_) => "toolResponse",
        }
    }
}

/// A classified message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SetupComplete,
    ServerContent(ServerContent),
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
}

/// Serialize an intent to a JSON text frame.
pub fn encode(intent: &OutboundIntent) -> CodecResult<String> {
    let result = match intent {
        OutboundIntent::Setup(config) => serde_json::to_string(&ClientMessage::Setup(config)),
        OutboundIntent::RealtimeInput(chunks) => {
            let body = RealtimeInput {
                media_chunks: chunks.clone(),
            };
            serde_json::to_string(&ClientMessage::RealtimeInput(&body))
        }
        OutboundIntent::ClientContent {
            turns,
            turn_complete,
        } => {
            let body = ClientContent {
                turns: turns.clone(),
                turn_complete: *turn_complete,
            };
            serde_json::to_string(&ClientMessage::ClientContent(&body))
        }
        OutboundIntent::ToolResponse(response) => {
            serde_json::to_string(&ClientMessage::ToolResponse(response))
        }
    };

    result.map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Parse and classify an inbound frame.
///
/// Binary frames carry UTF-8 JSON as well. Classification checks keys in the
/// order `setupComplete`, `serverContent`, `toolCall`, `toolCallCancellation`.
pub fn decode(frame: &Frame) -> CodecResult<InboundEvent> {
    let text = match frame {
        Frame::Text(text) => text.as_str(),
        Frame::Binary(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| CodecError::Malformed(format!("binary frame is not UTF-8: {e}")))?,
    };

    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(CodecError::UnknownMessage(truncate(text)));
    };

    if object.contains_key("setupComplete") {
        return Ok(InboundEvent::SetupComplete);
    }
    if let Some(body) = object.remove("serverContent") {
        return body_of(body, "serverContent").map(InboundEvent::ServerContent);
    }
    if let Some(body) = object.remove("toolCall") {
        return body_of(body, "toolCall").map(InboundEvent::ToolCall);
    }
    if let Some(body) = object.remove("toolCallCancellation") {
        return body_of(body, "toolCallCancellation").map(InboundEvent::ToolCallCancellation);
    }

    Err(CodecError::UnknownMessage(truncate(text)))
}

fn body_of<T>(body: Value, key: &str) -> CodecResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(body).map_err(|e| CodecError::Malformed(format!("{key}: {e}")))
}

const MAX_TRACE_LEN: usize = 200;

fn truncate(text: &str) -> String {
    if text.len() <= MAX_TRACE_LEN {
        return text.to_string();
    }
    let mut end = MAX_TRACE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::live::messages::{FunctionResponse, Part};
    use base64::prelude::*;
    use serde_json::json;

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_encode_setup() {
        let json = encode(&OutboundIntent::Setup(LiveConfig::new("models/m"))).unwrap();
        assert_eq!(parse(&json), json!({ "setup": { "model": "models/m" } }));
    }

    #[test]
    fn test_encode_client_turn() {
        let intent = OutboundIntent::ClientContent {
            turns: vec![Content::user(vec![Part::text("hello")])],
            turn_complete: true,
        };
        let json = encode(&intent).unwrap();
        assert_eq!(
            parse(&json),
            json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": [{ "text": "hello" }] }],
                    "turnComplete": true
                }
            })
        );
    }

    #[test]
    fn test_encode_silence_chunk() {
        let silence = vec![0u8; 3200];
        let intent = OutboundIntent::RealtimeInput(vec![Blob::pcm16(&silence, 16000)]);
        let json = encode(&intent).unwrap();

        let value = parse(&json);
        let chunk = &value["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], BASE64_STANDARD.encode(&silence));
        assert_eq!(
            value["realtimeInput"]["mediaChunks"].as_array().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_encode_tool_response() {
        let intent = OutboundIntent::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                response: json!({ "output": { "rate": 4.5 } }),
                id: "call-1".to_string(),
            }],
        });
        let json = encode(&intent).unwrap();
        assert_eq!(
            parse(&json),
            json!({
                "toolResponse": {
                    "functionResponses": [{ "response": { "output": { "rate": 4.5 } }, "id": "call-1" }]
                }
            })
        );
    }

    #[test]
    fn test_decode_setup_complete() {
        let event = decode(&Frame::Text(r#"{"setupComplete":{}}"#.to_string())).unwrap();
        assert_eq!(event, InboundEvent::SetupComplete);
    }

    #[test]
    fn test_decode_binary_frame() {
        let frame = Frame::Binary(Bytes::from_static(br#"{"setupComplete":{}}"#));
        assert_eq!(decode(&frame).unwrap(), InboundEvent::SetupComplete);
    }

    #[test]
    fn test_decode_server_content_defaults() {
        let event = decode(&Frame::Text(r#"{"serverContent":{}}"#.to_string())).unwrap();
        assert_eq!(event, InboundEvent::ServerContent(ServerContent::default()));
    }

    #[test]
    fn test_decode_server_content_with_turn() {
        let frame = Frame::Text(
            json!({
                "serverContent": {
                    "modelTurn": { "parts": [{ "text": "Hi" }] },
                    "turnComplete": true
                }
            })
            .to_string(),
        );
        let InboundEvent::ServerContent(content) = decode(&frame).unwrap() else {
            panic!("expected server content");
        };
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts[0].text.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_decode_tool_call_and_cancellation() {
        let frame = Frame::Text(
            r#"{"toolCall":{"functionCalls":[{"name":"f","id":"1","args":{"a":1}}]}}"#.to_string(),
        );
        let InboundEvent::ToolCall(call) = decode(&frame).unwrap() else {
            panic!("expected tool call");
        };
        assert_eq!(call.function_calls[0].name, "f");
        assert_eq!(call.function_calls[0].args, Some(json!({ "a": 1 })));

        let frame = Frame::Text(r#"{"toolCallCancellation":{"ids":["1","2"]}}"#.to_string());
        assert_eq!(
            decode(&frame).unwrap(),
            InboundEvent::ToolCallCancellation(ToolCallCancellation {
                ids: vec!["1".to_string(), "2".to_string()]
            })
        );
    }

    #[test]
    fn test_decode_priority_order() {
        let frame = Frame::Text(r#"{"toolCall":{},"setupComplete":{}}"#.to_string());
        assert_eq!(decode(&frame).unwrap(), InboundEvent::SetupComplete);
    }

    #[test]
    fn test_decode_unknown_message() {
        let err = decode(&Frame::Text(r#"{"goAway":{"timeLeft":"5s"}}"#.to_string())).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessage(_)));

        let err = decode(&Frame::Text("[1,2,3]".to_string())).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessage(_)));
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode(&Frame::Text("{not json".to_string())).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));

        let err = decode(&Frame::Binary(Bytes::from_static(&[0xff, 0xfe]))).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));

        let err = decode(&Frame::Text(r#"{"serverContent":{"turnComplete":"yes"}}"#.to_string()))
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_truncate_long_payload() {
        let long = "x".repeat(500);
        let out = truncate(&long);
        assert!(out.len() < 210);
        assert!(out.ends_with("..."));
    }
}
