//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Core error: {0}")]
    Core(#[from] sketchsync_core::Error),
}

impl ProtocolError {
    /// Wire code reported back to the peer
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidMessage(_) | ProtocolError::InvalidJson(_) => {
                crate::codes::INVALID_MESSAGE
            }
            ProtocolError::MessageTooLarge { .. } => crate::codes::FRAME_TOO_LARGE,
            ProtocolError::Core(e) => e.code(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(e.to_string())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
