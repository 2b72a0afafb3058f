//! Danmaku error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors that can occur while talking to a live room.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// Header/length inconsistency in a binary frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Decompression, JSON or schema decoding failure.
    #[error("Decode error: {0}")]
    Decode(String),

    /// No registry entry for the command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The upstream ended the current interactive (open platform) game session.
    #[error("Interaction ended: game_id={game_id}, timestamp={timestamp}")]
    InteractionInterrupt { game_id: String, timestamp: i64 },

    /// A REST handshake call returned a non-success status or body.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The socket was closed by the peer.
    #[error("Socket closed: {0}")]
    SocketClosed(String),

    /// Transport-level errors (connect, send, receive).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The requested outward operation does not exist or is private.
    #[error("API not available: {0}")]
    ApiNotAvailable(String),

    /// The upstream rejected an outward operation.
    #[error("Action failed: code={code}, message={message}")]
    ActionFailed { code: i64, message: String },

    /// Configuration loading errors.
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protobuf error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl DanmakuError {
    /// Create a malformed frame error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a handshake error.
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error must end the current socket cycle.
    ///
    /// Frame and command level errors are contained; everything that says the
    /// transport itself is unusable is not.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::SocketClosed(_)
                | Self::Connection(_)
                | Self::WebSocket(_)
                | Self::Io(_)
                | Self::HandshakeFailed(_)
        )
    }
}
