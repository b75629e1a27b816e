//! Document types: identity, undo/redo history and resident state

use crate::error::{Error, Result};
use crate::log::{EditLog, LogSnapshot};
use crate::stroke::Stroke;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// Maximum document identity length in bytes
pub const MAX_DOCUMENT_ID_LEN: usize = 1024;

/// Document identity - UTF-8 string, max 1024 bytes, no control characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new document ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidDocumentId("Document ID cannot be empty".into()));
        }

        if id.len() > MAX_DOCUMENT_ID_LEN {
            return Err(Error::InvalidDocumentId(format!(
                "Document ID exceeds {} bytes",
                MAX_DOCUMENT_ID_LEN
            )));
        }

        if id.chars().any(char::is_control) {
            return Err(Error::InvalidDocumentId(
                "Document ID cannot contain control characters".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Applied log plus redo buffer.
///
/// The redo buffer is a stack: its top is the most recently undone record,
/// which is the next one redo reinserts.
#[derive(Debug, Default)]
pub struct History {
    log: EditLog,
    redo: Vec<Stroke>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &EditLog {
        &self.log
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Append a new edit; discards the redo buffer
    pub fn apply(&mut self, record: Stroke) -> Result<()> {
        self.log.append(record)?;
        self.redo.clear();
        Ok(())
    }

    /// Move the tail record onto the redo buffer
    pub fn undo(&mut self) -> Result<()> {
        if self.log.is_empty() {
            return Err(Error::NothingToUndo);
        }

        let removed = self.log.truncate_tail(1)?;
        self.redo.extend(removed);
        Ok(())
    }

    /// Move the most recently undone record back onto the log
    pub fn redo(&mut self) -> Result<()> {
        let record = self.redo.pop().ok_or(Error::NothingToRedo)?;
        let tail = self.log.len();

        if let Err(e) = self.log.append_many(vec![record.clone()], tail) {
            self.redo.push(record);
            return Err(e);
        }
        Ok(())
    }

    /// Forget the whole history
    pub fn reset(&mut self) {
        self.log.clear();
        self.redo.clear();
    }
}

/// What kind of change produced a [`DocumentEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Applied,
    Reverted,
    Reapplied,
    Reset,
}

/// Fan-out event produced by every log mutation
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    pub kind: EditKind,
    pub revision: u64,
    pub log: LogSnapshot,
    /// Present only when the initial content itself was replaced
    pub initial_content: Option<Bytes>,
}

/// Document metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub revision: u64,
    pub log_len: usize,
    pub redo_len: usize,
    pub views: usize,
    pub dirty: bool,
    pub content_len: usize,
    pub opened_at: u64,
}

/// Mutable state of a resident document, guarded by the document lock
#[derive(Debug)]
pub(crate) struct DocumentState {
    pub(crate) initial_content: Bytes,
    pub(crate) history: History,
    pub(crate) revision: u64,
    pub(crate) saved_revision: u64,
    pub(crate) pending_saves: usize,
    /// The last view left while a save was in flight
    pub(crate) release_pending: bool,
    pub(crate) closed: bool,
}

impl DocumentState {
    pub(crate) fn event(&self, kind: EditKind) -> DocumentEvent {
        DocumentEvent {
            kind,
            revision: self.revision,
            log: self.history.log().snapshot(),
            initial_content: None,
        }
    }
}

/// A resident document: immutable initial content plus its edit history.
///
/// Every mutation happens under `state`, and fan-out is sent while the lock
/// is still held, so subscribers see events in exactly the order the log
/// changed.
pub struct Document {
    id: DocumentId,
    opened_at: u64,
    state: Mutex<DocumentState>,
    updates: broadcast::Sender<DocumentEvent>,
}

impl Document {
    pub(crate) fn new(id: DocumentId, initial_content: Bytes, capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));

        Self {
            id,
            opened_at: now_millis(),
            state: Mutex::new(DocumentState {
                initial_content,
                history: History::new(),
                revision: 0,
                saved_revision: 0,
                pending_saves: 0,
                release_pending: false,
                closed: false,
            }),
            updates,
        }
    }

    /// Get the document ID
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Current revision
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Initial content as read from storage
    pub fn initial_content(&self) -> Bytes {
        self.state.lock().initial_content.clone()
    }

    /// Snapshot of the applied log
    pub fn log(&self) -> LogSnapshot {
        self.state.lock().history.log().snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.updates.subscribe()
    }

    /// Send an event to every subscriber; callers hold the state lock
    pub(crate) fn publish(&self, event: DocumentEvent) -> usize {
        self.updates.send(event).unwrap_or(0)
    }

    pub(crate) fn meta(&self, state: &DocumentState, views: usize) -> DocumentMeta {
        DocumentMeta {
            id: self.id.clone(),
            revision: state.revision,
            log_len: state.history.log().len(),
            redo_len: state.history.redo_len(),
            views,
            dirty: state.revision != state.saved_revision,
            content_len: state.initial_content.len(),
            opened_at: self.opened_at,
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::Point;

    fn stroke(color: &str) -> Stroke {
        Stroke::new(color, vec![Point(0.0, 0.0), Point(1.0, 1.0)]).unwrap()
    }

    #[test]
    fn test_document_id_valid() {
        assert!(DocumentId::new("drawings/cat.png").is_ok());
        assert!(DocumentId::new("file:///tmp/a b.png").is_ok());
    }

    #[test]
    fn test_document_id_invalid() {
        assert!(DocumentId::new("").is_err());
        assert!(DocumentId::new("a\nb").is_err());
        assert!(DocumentId::new("a".repeat(1025)).is_err());
    }

    #[test]
    fn test_document_id_deserialize_validates() {
        assert!(serde_json::from_str::<DocumentId>("\"\"").is_err());
        let id: DocumentId = serde_json::from_str("\"cat.png\"").unwrap();
        assert_eq!(id.as_str(), "cat.png");
    }

    #[test]
    fn test_undo_then_redo_restores_log() {
        let mut history = History::new();
        history.apply(stroke("red")).unwrap();
        history.apply(stroke("blue")).unwrap();
        let before = history.log().snapshot();

        history.undo().unwrap();
        assert_eq!(history.log().len(), 1);
        assert_eq!(history.redo_len(), 1);

        history.redo().unwrap();
        assert_eq!(history.log().snapshot(), before);
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn test_new_edit_discards_redo_buffer() {
        let mut history = History::new();
        history.apply(stroke("#aaa")).unwrap();
        history.apply(stroke("#bbb")).unwrap();
        history.undo().unwrap();
        history.apply(stroke("#ccc")).unwrap();

        assert_eq!(history.redo(), Err(Error::NothingToRedo));
        let colors: Vec<_> = history.log().snapshot().iter().map(|s| s.color().to_string()).collect();
        assert_eq!(colors, vec!["#aaa", "#ccc"]);
    }

    #[test]
    fn test_undo_on_empty_log() {
        let mut history = History::new();
        assert_eq!(history.undo(), Err(Error::NothingToUndo));
        assert!(history.log().is_empty());
    }

    #[test]
    fn test_multiple_undo_redo_order() {
        let mut history = History::new();
        for color in ["#aaa", "#bbb", "#ccc"] {
            history.apply(stroke(color)).unwrap();
        }
        history.undo().unwrap();
        history.undo().unwrap();
        history.redo().unwrap();

        let colors: Vec<_> = history.log().snapshot().iter().map(|s| s.color().to_string()).collect();
        assert_eq!(colors, vec!["#aaa", "#bbb"]);
        assert_eq!(history.redo_len(), 1);
    }
}
