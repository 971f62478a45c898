//! Error types for niri IPC

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when talking to the niri compositor
#[derive(Debug, Error)]
pub enum NiriError {
    #[error("NIRI_SOCKET environment variable not set - is niri running?")]
    SocketNotSet,

    #[error("Niri socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    #[error("Failed to connect to niri socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send request to niri: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("Failed to receive from niri: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    #[error("Failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("Failed to deserialize niri message: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// Niri answered the request with an error or an unexpected response
    #[error("Niri rejected the request: {message}")]
    Rejected { message: String },

    #[error("Connection to niri closed unexpectedly")]
    ConnectionClosed,

    #[error("Failed to connect to niri after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}

impl NiriError {
    /// Whether the connection was lost and a reconnect may help.
    pub fn is_disconnect(&self) -> bool {
        match self {
            NiriError::ConnectionClosed => true,
            NiriError::ReceiveFailed(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
