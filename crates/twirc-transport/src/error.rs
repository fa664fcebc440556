//! Error types for the transport layer.

use std::io;
use std::time::Duration;

use thiserror::Error;
use twirc_core::EncodeError;

// =============================================================================
// Transport Errors
// =============================================================================

/// Failures of the underlying byte stream.
///
/// Mid-session transport errors never reach the caller of
/// [`Connection::connect`](crate::Connection::connect); they drive the
/// reconnect-or-close decision in the read loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Opening the transport failed.
    #[error("failed to connect to {target}: {reason}")]
    ConnectFailed {
        /// Host/port or URL that was dialled.
        target: String,
        /// Reason for the failure.
        reason: String,
    },

    /// The peer closed the stream or the connection was shut down.
    #[error("transport closed")]
    Closed,

    /// An outbound message could not be framed.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// WebSocket protocol error.
    #[cfg(feature = "ws-client")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

// =============================================================================
// Connection Errors
// =============================================================================

/// Failures of [`Connection::connect`](crate::Connection::connect).
///
/// These are surfaced to the caller and never retried automatically.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The handshake did not complete in time.
    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),

    /// The server rejected the login.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The transport failed during the handshake.
    #[error("transport failure during handshake: {0}")]
    Transport(#[from] TransportError),

    /// `connect` was called on a connection that is already open.
    #[error("connection is already established")]
    AlreadyConnected,

    /// `connect` was called after `close`.
    #[error("connection is closed")]
    Closed,

    /// Automatic reconnection gave up.
    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
