use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid signaling transition: {event} not allowed in state {from}")]
    InvalidTransition { from: String, event: String },

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
