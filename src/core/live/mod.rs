//! Gemini Live API module.
//!
//! This module provides bidirectional audio and text streaming against the
//! Gemini Live `BidiGenerateContent` WebSocket service.
//!
//! # Features
//!
//! - Setup handshake with model, voice and system instruction
//! - Streaming microphone audio (`realtimeInput`)
//! - Text turns (`clientContent`)
//! - Function calling (`toolCall` / `toolResponse`)
//! - Typed notifications for every server message
//!
//! # Audio Format
//!
//! Input audio is PCM 16-bit signed little-endian at 16kHz. Output audio is
//! PCM 16-bit signed little-endian at 24kHz.

pub mod base;
pub mod client;
pub mod codec;
pub mod config;
pub mod event;
pub mod messages;

pub use base::{ConnectionState, DEFAULT_SETUP_TIMEOUT, LiveClientOptions, LiveError, LiveResult};
pub use client::{LiveClient, WeakLiveClient};
pub use codec::{CodecError, CodecResult, Frame, InboundEvent, OutboundIntent, decode, encode};
pub use config::{
    DEFAULT_MODEL, GEMINI_LIVE_URL, LIVE_INPUT_SAMPLE_RATE, LIVE_OUTPUT_SAMPLE_RATE, LiveEndpoint,
    PrebuiltVoice, base_config,
};
pub use event::{CloseEvent, LiveEvent, LiveEventKind, StreamingLog};
pub use messages::{Blob, Content, LiveConfig, Part, ResponseModality, ServerContent, ToolResponse};
