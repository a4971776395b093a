pub mod audio;
pub mod events;
pub mod live;

// Re-export commonly used types for convenience
pub use events::{EventHub, Notification, Subscription};

pub use live::{
    ConnectionState, LiveClient, LiveClientOptions, LiveConfig, LiveEndpoint, LiveError,
    LiveEvent, LiveEventKind, LiveResult,
};

pub use audio::{
    AudioError, AudioRecorder, AudioResult, AudioStreamer, MicrophoneSource, OutputContext,
    RecorderEvent, RecorderEventKind,
};
