//! Error types for sketchsync core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document not open: {0}")]
    DocumentNotOpen(String),

    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Log underflow: requested {requested}, length {len}")]
    Underflow { requested: usize, len: usize },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("Render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Stable wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::DocumentNotOpen(_) => "NOT_OPEN",
            Error::InvalidDocumentId(_) => "INVALID_ID",
            Error::InvalidRecord(_) => "INVALID_RECORD",
            Error::Underflow { .. } => "UNDERFLOW",
            Error::NothingToUndo => "NOTHING_TO_UNDO",
            Error::NothingToRedo => "NOTHING_TO_REDO",
            Error::Render(_) => "RENDER_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Benign failures are surfaced upstream as disabled affordances
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Error::Underflow { .. } | Error::NothingToUndo | Error::NothingToRedo
        )
    }
}

/// Result type alias for sketchsync core operations
pub type Result<T> = std::result::Result<T, Error>;
