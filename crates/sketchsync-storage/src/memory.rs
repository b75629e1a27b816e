//! In-memory storage backend

use crate::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sketchsync_core::{ContentStore, DocumentId};
use tracing::debug;

/// In-memory storage backend
///
/// Fast, volatile storage suitable for tests and embedding.
/// Data is lost when the process exits.
pub struct MemoryStorage {
    data: DashMap<DocumentId, Bytes>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Seed a document
    pub fn with_document(self, id: DocumentId, data: impl Into<Bytes>) -> Self {
        self.insert(id, data.into());
        self
    }

    /// Store a blob, replacing any previous one
    pub fn insert(&self, id: DocumentId, data: Bytes) {
        self.data.insert(id, data);
    }

    pub fn get(&self, id: &DocumentId) -> Option<Bytes> {
        self.data.get(id).map(|entry| entry.value().clone())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStorage {
    async fn read(&self, id: &DocumentId) -> sketchsync_core::Result<Bytes> {
        self.get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()).into())
    }

    async fn write(&self, id: &DocumentId, data: Bytes) -> sketchsync_core::Result<()> {
        debug!(doc_id = %id, bytes = data.len(), "Storing document in memory");
        self.insert(id.clone(), data);
        Ok(())
    }
}
