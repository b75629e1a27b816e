//! Seams to the external collaborators the authority delegates to

use crate::document::DocumentId;
use crate::error::Result;
use crate::log::LogSnapshot;
use async_trait::async_trait;
use bytes::Bytes;

/// Storage collaborator: where initial content comes from and saves go to
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read the stored blob for a document.
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) when nothing is
    /// stored under `id`.
    async fn read(&self, id: &DocumentId) -> Result<Bytes>;

    /// Replace the stored blob for a document
    async fn write(&self, id: &DocumentId, data: Bytes) -> Result<()>;
}

/// Rendering collaborator: folds a log over the initial content into final bytes
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, initial_content: Bytes, log: LogSnapshot) -> Result<Bytes>;
}
