//! Error types for the inspector agent.
//!
//! All fallible operations return [`Result<T>`] which uses [`enum@Error`].
//!
//! # Error Disposition
//!
//! | Variant | Produced by | Effect |
//! |---------|-------------|--------|
//! | [`Error::BindFailed`] | listener setup | agent enters `Error` state, no retry |
//! | [`Error::HandshakeFailed`] | HTTP upgrade parsing | socket closed, no session created |
//! | [`Error::FrameProtocol`] | RFC 6455 violations | close 1002/1003, session ends |
//! | [`Error::SessionBusy`] | concurrent upgrade | 500 response, existing session unaffected |
//! | [`Error::WriteBackpressure`] | write queue high-watermark | close 1009, session ends |
//! | [`Error::NoSession`] | engine-thread dispatch | reported to the caller |
//! | [`Error::InvalidState`] | lifecycle misuse | reported to the caller |
//!
//! Transport-level errors kill at most a session, never the agent; the
//! listener keeps accepting.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Listener Errors
    // ========================================================================
    /// No listener could be bound for the configured endpoint.
    #[error("Failed to bind inspector listener on {host}:{port}: {source}")]
    BindFailed {
        /// Configured bind host.
        host: String,
        /// Configured bind port (0 = ephemeral).
        port: u16,
        /// Underlying socket error of the last attempted address.
        #[source]
        source: IoError,
    },

    /// The I/O thread could not be spawned or died before reporting its
    /// listener state.
    #[error("Inspector I/O thread failed to start: {message}")]
    IoThreadFailed {
        /// Description of the startup failure.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The HTTP handshake was malformed or timed out.
    #[error("WebSocket handshake failed: {reason}")]
    HandshakeFailed {
        /// Description of the handshake failure.
        reason: String,
    },

    /// The peer violated WebSocket framing rules.
    #[error("WebSocket frame protocol error: {reason}")]
    FrameProtocol {
        /// Description of the framing violation.
        reason: String,
    },

    /// An upgrade was attempted while another session holds the target.
    #[error("A session is already attached to this target")]
    SessionBusy,

    /// A session's pending writes exceeded the high-watermark.
    #[error("Session write queue exceeded {limit} bytes ({queued} queued)")]
    WriteBackpressure {
        /// Bytes queued at the time of the check.
        queued: usize,
        /// Configured high-watermark.
        limit: usize,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Agent configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// An engine-thread operation required a live session.
    #[error("No inspector session is connected")]
    NoSession,

    /// An operation was called in a lifecycle state that does not permit it.
    #[error("Cannot {operation} while the agent is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: String,
        /// Human-readable current state.
        state: String,
    },

    /// The frontend URL file could not be written.
    #[error("Failed to write frontend URL to {path}: {source}")]
    UrlFileWrite {
        /// Configured file path.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: IoError,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error from the framing layer.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Constructor Helpers
// ============================================================================

impl Error {
    /// Creates a [`Error::Config`] with the given message.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a [`Error::HandshakeFailed`] with the given reason.
    #[inline]
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Creates a [`Error::FrameProtocol`] with the given reason.
    #[inline]
    pub fn frame_protocol(reason: impl Into<String>) -> Self {
        Self::FrameProtocol {
            reason: reason.into(),
        }
    }

    /// Creates a [`Error::InvalidState`] for the given operation.
    #[inline]
    pub fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// Creates a [`Error::IoThreadFailed`] with the given message.
    #[inline]
    pub fn io_thread(message: impl Into<String>) -> Self {
        Self::IoThreadFailed {
            message: message.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_failed_display_includes_endpoint() {
        let err = Error::BindFailed {
            host: "127.0.0.1".to_string(),
            port: 9229,
            source: IoError::from(std::io::ErrorKind::AddrInUse),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:9229"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("run", "Done");
        assert_eq!(err.to_string(), "Cannot run while the agent is Done");
    }

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            Err(IoError::from(std::io::ErrorKind::BrokenPipe))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(Error::Io(_))));
    }
}
