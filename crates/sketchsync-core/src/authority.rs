//! Document authority - the single writer of every document's edit log

use crate::collab::{ContentStore, Renderer};
use crate::document::{Document, DocumentEvent, DocumentId, DocumentMeta, DocumentState, EditKind, History};
use crate::error::{Error, Result};
use crate::log::LogSnapshot;
use crate::registry::{Detached, ViewId, ViewRegistry};
use crate::stroke::Stroke;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How many times `attach` retries when it races a document close
const ATTACH_RETRIES: usize = 3;

/// Authority configuration
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Per-document fan-out buffer; slower views lag and resync
    pub broadcast_capacity: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

/// Full state of a document at one revision
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub revision: u64,
    pub initial_content: Bytes,
    pub log: LogSnapshot,
}

/// A view's handle on a document, returned by [`Authority::attach`].
///
/// The snapshot and the subscription are taken under the same lock, so
/// every event received on `updates` is newer than `snapshot`.
#[derive(Debug)]
pub struct Attachment {
    pub view: ViewId,
    pub document: DocumentId,
    pub snapshot: DocumentSnapshot,
    pub updates: broadcast::Receiver<DocumentEvent>,
}

/// Authority statistics
#[derive(Debug, Clone)]
pub struct AuthorityStats {
    pub document_count: usize,
    pub view_count: usize,
}

/// Owns every resident document and serializes all mutations per document.
///
/// Operations on one document run one at a time in lock acquisition order;
/// different documents never contend. Rendering happens outside the lock.
pub struct Authority {
    store: Arc<dyn ContentStore>,
    renderer: Arc<dyn Renderer>,
    documents: DashMap<DocumentId, Arc<Document>>,
    registry: ViewRegistry,
    config: AuthorityConfig,
}

impl Authority {
    /// Create a new authority
    pub fn new(store: Arc<dyn ContentStore>, renderer: Arc<dyn Renderer>) -> Self {
        Self::with_config(store, renderer, AuthorityConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn ContentStore>,
        renderer: Arc<dyn Renderer>,
        config: AuthorityConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            documents: DashMap::new(),
            registry: ViewRegistry::new(),
            config,
        }
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    /// Open a document, reading its initial content on first use.
    ///
    /// Reopening a resident document returns the existing instance; a
    /// document that was closed is read from storage again with an empty log.
    pub async fn open(&self, id: &DocumentId) -> Result<Arc<Document>> {
        if let Some(doc) = self.lookup(id) {
            return Ok(doc);
        }

        let content = self.store.read(id).await?;
        let fresh = Arc::new(Document::new(
            id.clone(),
            content,
            self.config.broadcast_capacity,
        ));

        let doc = self
            .documents
            .entry(id.clone())
            .or_insert_with(|| fresh.clone())
            .value()
            .clone();

        if Arc::ptr_eq(&doc, &fresh) {
            info!(doc_id = %id, bytes = doc.initial_content().len(), "Document opened");
        }
        Ok(doc)
    }

    /// Get a resident document
    pub fn get(&self, id: &DocumentId) -> Result<Arc<Document>> {
        self.lookup(id)
            .ok_or_else(|| Error::DocumentNotOpen(id.to_string()))
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    /// Open (if needed) and attach a view to a document
    pub async fn attach(&self, id: &DocumentId, view: ViewId) -> Result<Attachment> {
        for _ in 0..ATTACH_RETRIES {
            let doc = self.open(id).await?;
            if let Some(attachment) = self.try_attach(&doc, view) {
                info!(
                    doc_id = %id,
                    view = %view,
                    views = self.registry.view_count(id),
                    "View attached"
                );
                return Ok(attachment);
            }
            debug!(doc_id = %id, view = %view, "Document closed during attach, reopening");
        }

        Err(Error::DocumentNotOpen(id.to_string()))
    }

    fn try_attach(&self, doc: &Arc<Document>, view: ViewId) -> Option<Attachment> {
        let mut state = doc.lock();
        if state.closed {
            return None;
        }

        state.release_pending = false;
        let updates = doc.subscribe();
        self.registry.attach(doc.id(), view);

        Some(Attachment {
            view,
            document: doc.id().clone(),
            snapshot: snapshot_of(&state),
            updates,
        })
    }

    /// Detach a view; closes the document when it was the last interest
    pub fn detach(&self, id: &DocumentId, view: ViewId) -> Detached {
        let Some(doc) = self.lookup(id) else {
            return Detached::NotAttached;
        };

        let mut state = doc.lock();
        let outcome = self.registry.detach(id, view);
        debug!(doc_id = %id, view = %view, outcome = ?outcome, "View detached");

        if outcome == Detached::Empty {
            if state.pending_saves > 0 {
                state.release_pending = true;
            } else {
                self.close_if_idle(&doc, &mut state);
            }
        }
        outcome
    }

    /// Views currently attached to a document
    pub fn broadcast_targets(&self, id: &DocumentId) -> BTreeSet<ViewId> {
        self.registry.broadcast_targets(id)
    }

    /// Append an edit, discard the redo buffer and fan the new log out
    pub fn apply_edit(&self, id: &DocumentId, record: Stroke) -> Result<DocumentEvent> {
        self.mutate(id, EditKind::Applied, |history| history.apply(record))
    }

    /// Remove the last edit
    pub fn undo(&self, id: &DocumentId) -> Result<DocumentEvent> {
        self.mutate(id, EditKind::Reverted, History::undo)
    }

    /// Reinsert the most recently undone edit
    pub fn redo(&self, id: &DocumentId) -> Result<DocumentEvent> {
        self.mutate(id, EditKind::Reapplied, History::redo)
    }

    fn mutate<F>(&self, id: &DocumentId, kind: EditKind, f: F) -> Result<DocumentEvent>
    where
        F: FnOnce(&mut History) -> Result<()>,
    {
        let doc = self.get(id)?;
        let mut state = doc.lock();
        if state.closed {
            return Err(Error::DocumentNotOpen(id.to_string()));
        }

        f(&mut state.history)?;
        state.revision += 1;

        let event = state.event(kind);
        let delivered = doc.publish(event.clone());
        debug!(
            doc_id = %id,
            kind = ?kind,
            revision = event.revision,
            log_len = event.log.len(),
            delivered = delivered,
            "Log updated"
        );
        Ok(event)
    }

    /// Snapshot of the applied log
    pub fn current_log(&self, id: &DocumentId) -> Result<LogSnapshot> {
        Ok(self.get(id)?.log())
    }

    /// Revision, initial content and log, taken atomically
    pub fn snapshot(&self, id: &DocumentId) -> Result<DocumentSnapshot> {
        let doc = self.get(id)?;
        let state = doc.lock();
        Ok(snapshot_of(&state))
    }

    /// Fold the initial content with the log into final bytes.
    ///
    /// The document is pinned open while rendering, and the lock is not
    /// held, so edits keep flowing during a long render.
    pub async fn materialize(&self, id: &DocumentId) -> Result<Bytes> {
        let pending = self.begin_save(id)?;
        let bytes = self.render(id, &pending.snapshot).await?;
        drop(pending);
        Ok(bytes)
    }

    /// Materialize and write through the storage collaborator.
    ///
    /// `target` defaults to the document itself. Returns the revision that
    /// was written.
    pub async fn save(&self, id: &DocumentId, target: Option<&DocumentId>) -> Result<u64> {
        let pending = self.begin_save(id)?;
        let revision = pending.snapshot.revision;
        let bytes = self.render(id, &pending.snapshot).await?;

        let target = target.unwrap_or(id);
        self.store.write(target, bytes).await?;

        if target == id {
            let mut state = pending.doc.lock();
            state.saved_revision = revision;
        }
        info!(doc_id = %id, target = %target, revision = revision, "Document saved");

        drop(pending);
        Ok(revision)
    }

    /// Discard every edit and reload the initial content from storage
    pub async fn revert(&self, id: &DocumentId) -> Result<DocumentEvent> {
        let doc = self.get(id)?;
        let content = self.store.read(id).await?;

        let mut state = doc.lock();
        if state.closed {
            return Err(Error::DocumentNotOpen(id.to_string()));
        }

        state.initial_content = content.clone();
        state.history.reset();
        state.revision += 1;
        state.saved_revision = state.revision;

        let mut event = state.event(EditKind::Reset);
        event.initial_content = Some(content);
        let delivered = doc.publish(event.clone());
        info!(doc_id = %id, revision = event.revision, delivered = delivered, "Document reverted");
        Ok(event)
    }

    /// Document metadata
    pub fn meta(&self, id: &DocumentId) -> Result<DocumentMeta> {
        let doc = self.get(id)?;
        let state = doc.lock();
        Ok(doc.meta(&state, self.registry.view_count(id)))
    }

    /// Metadata for every resident document
    pub fn list(&self) -> Vec<DocumentMeta> {
        let docs: Vec<Arc<Document>> = self
            .documents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut metas: Vec<DocumentMeta> = docs
            .iter()
            .map(|doc| {
                let state = doc.lock();
                doc.meta(&state, self.registry.view_count(doc.id()))
            })
            .collect();
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        metas
    }

    /// Get statistics
    pub fn stats(&self) -> AuthorityStats {
        AuthorityStats {
            document_count: self.documents.len(),
            view_count: self.registry.total_views(),
        }
    }

    fn lookup(&self, id: &DocumentId) -> Option<Arc<Document>> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    fn begin_save(&self, id: &DocumentId) -> Result<PendingSave<'_>> {
        let doc = self.get(id)?;
        let snapshot = {
            let mut state = doc.lock();
            if state.closed {
                return Err(Error::DocumentNotOpen(id.to_string()));
            }
            state.pending_saves += 1;
            snapshot_of(&state)
        };

        Ok(PendingSave {
            authority: self,
            doc,
            snapshot,
        })
    }

    async fn render(&self, id: &DocumentId, snapshot: &DocumentSnapshot) -> Result<Bytes> {
        if snapshot.log.is_empty() {
            return Ok(snapshot.initial_content.clone());
        }

        self.renderer
            .render(snapshot.initial_content.clone(), snapshot.log.clone())
            .await
            .inspect_err(|e| warn!(doc_id = %id, error = %e, "Render failed"))
    }

    /// Close a document nobody is interested in any more; caller holds its lock
    fn close_if_idle(&self, doc: &Document, state: &mut DocumentState) -> bool {
        if state.closed || state.pending_saves > 0 || self.registry.view_count(doc.id()) > 0 {
            return false;
        }

        state.closed = true;
        self.documents
            .remove_if(doc.id(), |_, resident| std::ptr::eq(resident.as_ref(), doc));
        self.registry.forget(doc.id());
        info!(doc_id = %doc.id(), revision = state.revision, "Document closed");
        true
    }
}

fn snapshot_of(state: &DocumentState) -> DocumentSnapshot {
    DocumentSnapshot {
        revision: state.revision,
        initial_content: state.initial_content.clone(),
        log: state.history.log().snapshot(),
    }
}

/// Keeps a document open while a render or save is in flight
struct PendingSave<'a> {
    authority: &'a Authority,
    doc: Arc<Document>,
    snapshot: DocumentSnapshot,
}

impl Drop for PendingSave<'_> {
    fn drop(&mut self) {
        let mut state = self.doc.lock();
        state.pending_saves = state.pending_saves.saturating_sub(1);
        if state.pending_saves == 0 && state.release_pending {
            state.release_pending = false;
            self.authority.close_if_idle(&self.doc, &mut state);
        }
    }
}
