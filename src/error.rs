//! Error types for the speech session client.

use thiserror::Error;

/// Error type for session operations.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A play intent carried no text to synthesize.
    #[error("No text to synthesize")]
    EmptyText,

    /// Connection handshake did not complete in time.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// A send was attempted with no live connection.
    #[error("Not connected")]
    NotConnected,

    /// The session run loop has ended and no longer accepts intents.
    #[error("Session closed")]
    SessionClosed,
}
