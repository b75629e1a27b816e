//! Sketchsync Storage Backends
//!
//! Content stores the authority reads initial content from and saves to:
//! - Memory (default): Fast, volatile storage
//! - Filesystem: one file per document under a root directory

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "fs")]
pub mod fs;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<StorageError> for sketchsync_core::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => sketchsync_core::Error::NotFound(id),
            StorageError::InvalidPath(msg) => sketchsync_core::Error::InvalidDocumentId(msg),
            StorageError::Io(msg) => sketchsync_core::Error::Io(msg),
        }
    }
}

#[cfg(feature = "memory")]
pub use memory::MemoryStorage;
#[cfg(feature = "fs")]
pub use fs::FsStorage;
