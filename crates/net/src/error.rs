//! Network error types

use std::sync::Arc;
use std::time::Duration;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
///
/// Cloneable so one failure can be handed to every registered callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Handshake rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("Dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No frame received within {0:?}")]
    ReadTimeout(Duration),

    #[error("Connection closed by hub (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("Connection lost without close frame")]
    ConnectionLost,

    #[error("Codec error: {0}")]
    Codec(Arc<taibai_core::Error>),

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Client shut down")]
    Cancelled,

    #[error("Invalid config: {0}")]
    Config(String),
}

impl Error {
    /// The connection will not recover without an explicit `connect()`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ReconnectExhausted { .. })
    }

    /// Per-frame or per-call failure; the connection itself is unaffected
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Codec(_) | Error::QueueFull)
    }
}

impl From<taibai_core::Error> for Error {
    fn from(e: taibai_core::Error) -> Self {
        Error::Codec(Arc::new(e))
    }
}

impl From<taibai_core::ConfigError> for Error {
    fn from(e: taibai_core::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
