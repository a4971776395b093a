//! Base types for the live session client.
//!
//! Errors, connection state and client options shared by the codec and the
//! client.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::codec::CodecError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during live session operations.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Transport failed to open, or closed before the setup handshake finished
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Operation attempted outside the connection state it requires
    #[error("Invalid state: {operation} requires {required}, connection is {actual}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the operation requires
        required: ConnectionState,
        /// State the connection was in
        actual: ConnectionState,
    },

    /// Send failure on an otherwise ready connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound intent could not be encoded, or an inbound frame was malformed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid endpoint or session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for live session operations.
pub type LiveResult<T> = Result<T, LiveError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a live client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ConnectionState {
    /// No transport
    #[default]
    Disconnected,
    /// Transport is opening
    Connecting,
    /// Transport open, setup sent, waiting for `setupComplete`
    AwaitingSetupAck,
    /// Setup acknowledged; content may be exchanged
    Ready,
    /// Transport is being closed
    Closing,
}

impl ConnectionState {
    /// Whether a transport exists (or is being opened) in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::AwaitingSetupAck | ConnectionState::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::AwaitingSetupAck => write!(f, "AwaitingSetupAck"),
            ConnectionState::Ready => write!(f, "Ready"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

// =============================================================================
// Client Options
// =============================================================================

/// Default time allowed between opening the transport and `setupComplete`.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning knobs for [`LiveClient`](super::LiveClient).
#[derive(Debug, Clone)]
pub struct LiveClientOptions {
    /// Fail `connect` with a connection error if setup is not acknowledged in
    /// time. `None` waits indefinitely.
    pub setup_timeout: Option<Duration>,
    /// Allow plain `ws://` endpoints on loopback hosts (local mocks, proxies).
    pub allow_insecure_localhost: bool,
}

impl Default for LiveClientOptions {
    fn default() -> Self {
        Self {
            setup_timeout: Some(DEFAULT_SETUP_TIMEOUT),
            allow_insecure_localhost: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Ready.to_string(), "Ready");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            ConnectionState::AwaitingSetupAck.to_string(),
            "AwaitingSetupAck"
        );
    }

    #[test]
    fn test_connection_state_is_active() {
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::AwaitingSetupAck.is_active());
        assert!(ConnectionState::Ready.is_active());
        assert!(!ConnectionState::Closing.is_active());
    }

    #[test]
    fn test_error_display() {
        let err = LiveError::Connection("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = LiveError::InvalidState {
            operation: "send",
            required: ConnectionState::Ready,
            actual: ConnectionState::Disconnected,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state: send requires Ready, connection is Disconnected"
        );
    }

    #[test]
    fn test_default_options() {
        let options = LiveClientOptions::default();
        assert_eq!(options.setup_timeout, Some(DEFAULT_SETUP_TIMEOUT));
        assert!(options.allow_insecure_localhost);
    }
}
