//! Error types for the streaming client

use thiserror::Error;

use crate::protocol::ConnectionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Media device errors (microphone, speaker, camera)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Socket-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed unexpectedly")]
    AbruptClose,
}

/// Wire payload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("PCM payload has odd byte length: {0}")]
    OddPcmLength(usize),

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Image encoding failed: {0}")]
    ImageEncoding(String),
}

/// Session controller errors returned to UI collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Stream configuration cannot change while streaming")]
    ConfigLocked,

    #[error("Session is no longer running")]
    Closed,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
