//! Error type shared by every layer of the session client.

use tokio_tungstenite::tungstenite::Error as WsError;

/// Error type for live session operations
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio device error: {0}")]
    Audio(String),

    #[error("Failed to decode audio fragment: {0}")]
    Decode(String),

    #[error("Missing configuration: {0}")]
    Config(String),

    #[error("Transport rejected the session: {0}")]
    Rejected(String),

    #[error("Timed out waiting for the session to open")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,
}

impl From<base64::DecodeError> for LiveError {
    fn from(e: base64::DecodeError) -> Self {
        LiveError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;
