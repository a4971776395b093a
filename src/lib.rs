pub mod config;
pub mod core;
pub mod session;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ClientSettings, ConfigError};
pub use core::*;
pub use session::{
    HeadlessBackend, PlaybackBackend, SessionError, SessionOptions, SessionResult, SessionStatus,
    VoiceSession,
};

#[cfg(feature = "device-audio")]
pub use session::DeviceBackend;
