//! Error types for the view side

use sketchsync_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("View has not received its initial state")]
    NotReady,

    #[error("View is closed")]
    Closed,

    #[error("No stroke in progress")]
    NoStroke,

    #[error("Stroke already in progress")]
    StrokeInProgress,

    #[error(transparent)]
    Core(#[from] sketchsync_core::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Host error {code}: {message}")]
    Host { code: String, message: String },

    #[error("Connection closed by host")]
    Disconnected,

    #[error("Timed out waiting for host")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ViewError>;
