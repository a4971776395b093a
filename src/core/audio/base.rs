//! Base types for the audio units.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in capture or playback.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Microphone or speaker could not be opened (missing, denied, busy)
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Output context was closed and cannot be resumed
    #[error("Output context is closed")]
    ContextClosed,

    /// Audio processor could not be attached
    #[error("Audio processor error: {0}")]
    Processor(String),

    /// Device stream failed after it was opened
    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Rate of captured audio handed to the live client.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Declared rate of model audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Cadence of `data` notifications from the recorder.
pub const DATA_INTERVAL: Duration = Duration::from_millis(100);

/// Cadence of `volume` notifications from the recorder.
pub const VOLUME_INTERVAL: Duration = Duration::from_millis(50);

/// Frames processed per render call into the meter and gain stages.
pub const RENDER_QUANTUM: usize = 128;
