//! Filesystem storage backend

use crate::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use sketchsync_core::{ContentStore, DocumentId};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Filesystem storage backend
///
/// Each document identity is a relative path under `root`. Writes go to a
/// sibling temporary file first and are renamed into place.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {}", root.display(), e)))?;

        info!(root = %root.display(), "Filesystem storage ready");
        Ok(Self { root })
    }

    /// Map a document identity to a path inside the root
    fn resolve(&self, id: &DocumentId) -> Result<PathBuf, StorageError> {
        let relative = Path::new(id.as_str());
        let mut path = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(StorageError::InvalidPath(format!(
                        "{} escapes the storage root",
                        id
                    )))
                }
            }
        }

        if path == self.root {
            return Err(StorageError::InvalidPath(format!("{} names no file", id)));
        }
        Ok(path)
    }

    async fn read_blob(&self, id: &DocumentId) -> Result<Bytes, StorageError> {
        let path = self.resolve(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(id.to_string())),
            Err(e) => Err(StorageError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    async fn write_blob(&self, id: &DocumentId, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(id)?;
        let io_err = |e: std::io::Error| StorageError::Io(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        debug!(doc_id = %id, bytes = data.len(), "Document written to disk");
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FsStorage {
    async fn read(&self, id: &DocumentId) -> sketchsync_core::Result<Bytes> {
        Ok(self.read_blob(id).await?)
    }

    async fn write(&self, id: &DocumentId, data: Bytes) -> sketchsync_core::Result<()> {
        Ok(self.write_blob(id, &data).await?)
    }
}
