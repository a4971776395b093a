//! Notifications published by [`LiveClient`](super::LiveClient).

use bytes::Bytes;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::codec::CodecError;
use super::messages::{ServerContent, ToolCall, ToolCallCancellation};
use crate::core::events::Notification;

/// Kinds a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveEventKind {
    Open,
    SetupComplete,
    Content,
    Interrupted,
    TurnComplete,
    Audio,
    ToolCall,
    ToolCallCancellation,
    Close,
    Log,
    ProtocolError,
    TransportError,
}

impl LiveEventKind {
    /// Event name as used in protocol traces.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::SetupComplete => "setupcomplete",
            Self::Content => "content",
            Self::Interrupted => "interrupted",
            Self::TurnComplete => "turncomplete",
            Self::Audio => "audio",
            Self::ToolCall => "toolcall",
            Self::ToolCallCancellation => "toolcallcancellation",
            Self::Close => "close",
            Self::Log => "log",
            Self::ProtocolError => "protocolError",
            Self::TransportError => "transportError",
        }
    }
}

impl std::fmt::Display for LiveEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Details of a closed connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseEvent {
    /// WebSocket close code, when one was received or sent
    pub code: Option<u16>,
    /// Close reason or error description
    pub reason: String,
    /// `true` when the client closed the connection itself
    pub initiated_locally: bool,
}

/// One protocol trace entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingLog {
    pub date: OffsetDateTime,
    /// Direction and message name, e.g. `client.realtimeInput`
    pub kind: String,
    pub message: String,
}

impl StreamingLog {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            date: OffsetDateTime::now_utc(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StreamingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let date = self
            .date
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.date.unix_timestamp().to_string());
        write!(f, "{date} [{}] {}", self.kind, self.message)
    }
}

/// Everything a live client can report.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Transport opened
    Open,
    /// Setup acknowledged by the server
    SetupComplete,
    /// Non-audio model output. `model_turn` holds only the non-audio parts.
    Content(ServerContent),
    /// The model was interrupted; queued playback should be discarded
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Decoded PCM16 little-endian audio from the model
    Audio(Bytes),
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    Close(CloseEvent),
    Log(StreamingLog),
    /// An inbound frame could not be decoded; the connection stays up
    ProtocolError(CodecError),
    /// An outbound message could not be delivered
    TransportError(String),
}

impl Notification for LiveEvent {
    type Kind = LiveEventKind;

    fn kind(&self) -> LiveEventKind {
        match self {
            LiveEvent::Open => LiveEventKind::Open,
            LiveEvent::SetupComplete => LiveEventKind::SetupComplete,
            LiveEvent::Content(_) => LiveEventKind::Content,
            LiveEvent::Interrupted => LiveEventKind::Interrupted,
            LiveEvent::TurnComplete => LiveEventKind::TurnComplete,
            LiveEvent::Audio(_) => LiveEventKind::Audio,
            LiveEvent::ToolCall(_) => LiveEventKind::ToolCall,
            LiveEvent::ToolCallCancellation(_) => LiveEventKind::ToolCallCancellation,
            LiveEvent::Close(_) => LiveEventKind::Close,
            LiveEvent::Log(_) => LiveEventKind::Log,
            LiveEvent::ProtocolError(_) => LiveEventKind::ProtocolError,
            LiveEvent::TransportError(_) => LiveEventKind::TransportError,
        }
    }
}
