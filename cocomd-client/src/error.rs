//! Error types for cocomd-client
//!
//! Every failure is handled at the component that detects it and turned
//! into a state no-op plus a `ClientEvent`; these variants classify what
//! went wrong for logging and for the operator console.

use thiserror::Error;

/// Main error type for cocomd-client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Push channel failed to open or closed unexpectedly
    #[error("Connection error: {0}")]
    Connection(String),

    /// Endpoint answered with a non-success status (or an error body)
    #[error("Request to {endpoint} failed{}: {message}", status_suffix(.status))]
    Request {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// HTTP transport failure before any status was received
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Inbound message or response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Command not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Frame export failed
    #[error("Export error: {0}")]
    Export(String),

    /// Invalid operator input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session controller is no longer running
    #[error("Session controller has stopped")]
    ChannelClosed,
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" with status {}", s))
        .unwrap_or_default()
}

impl From<cocomd_common::Error> for ClientError {
    fn from(e: cocomd_common::Error) -> Self {
        match e {
            cocomd_common::Error::Decode(msg) => ClientError::Decode(msg),
            cocomd_common::Error::Config(msg) => ClientError::Config(msg),
            cocomd_common::Error::InvalidInput(msg) => ClientError::InvalidInput(msg),
            cocomd_common::Error::Io(e) => ClientError::Io(e),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Connection(e.to_string())
    }
}

impl ClientError {
    /// HTTP status carried by a request failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Request { status, .. } => *status,
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Convenience Result type using cocomd-client ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
