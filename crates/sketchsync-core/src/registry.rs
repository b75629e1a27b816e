//! View registry - which views are attached to which document

use crate::document::DocumentId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one open view instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(u64);

impl ViewId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// Outcome of [`ViewRegistry::detach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Other views are still attached
    Remaining(usize),
    /// That was the last view of the document
    Empty,
    /// The view was not attached
    NotAttached,
}

/// Non-owning association from document to its live views.
///
/// The registry only tracks who must be notified; it owns no view resources.
/// The authority calls it while holding the document lock, so membership
/// changes are serialized with broadcasts for the same document.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: DashMap<DocumentId, BTreeSet<ViewId>>,
    next_id: AtomicU64,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh view id
    pub fn allocate_id(&self) -> ViewId {
        ViewId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Add a view; returns false if it was already attached
    pub fn attach(&self, document: &DocumentId, view: ViewId) -> bool {
        self.views.entry(document.clone()).or_default().insert(view)
    }

    /// Remove a view from a document
    pub fn detach(&self, document: &DocumentId, view: ViewId) -> Detached {
        let outcome = match self.views.get_mut(document) {
            Some(mut set) => {
                if !set.remove(&view) {
                    Detached::NotAttached
                } else if set.is_empty() {
                    Detached::Empty
                } else {
                    Detached::Remaining(set.len())
                }
            }
            None => Detached::NotAttached,
        };

        if outcome == Detached::Empty {
            self.views.remove_if(document, |_, set| set.is_empty());
        }
        outcome
    }

    /// Views that must receive a broadcast for `document`
    pub fn broadcast_targets(&self, document: &DocumentId) -> BTreeSet<ViewId> {
        self.views
            .get(document)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn view_count(&self, document: &DocumentId) -> usize {
        self.views.get(document).map(|set| set.len()).unwrap_or(0)
    }

    /// Total number of attached views across documents
    pub fn total_views(&self) -> usize {
        self.views.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drop every association for a document
    pub fn forget(&self, document: &DocumentId) {
        self.views.remove(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_targets() {
        let registry = ViewRegistry::new();
        let doc = DocumentId::new("cat.png").unwrap();
        let a = registry.allocate_id();
        let b = registry.allocate_id();

        assert!(registry.attach(&doc, a));
        assert!(registry.attach(&doc, b));
        assert!(!registry.attach(&doc, a));

        let targets = registry.broadcast_targets(&doc);
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_detach_reports_empty() {
        let registry = ViewRegistry::new();
        let doc = DocumentId::new("cat.png").unwrap();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        registry.attach(&doc, a);
        registry.attach(&doc, b);

        assert_eq!(registry.detach(&doc, a), Detached::Remaining(1));
        assert_eq!(registry.detach(&doc, a), Detached::NotAttached);
        assert_eq!(registry.detach(&doc, b), Detached::Empty);
        assert!(registry.broadcast_targets(&doc).is_empty());
        assert_eq!(registry.total_views(), 0);
    }

    #[test]
    fn test_documents_are_independent() {
        let registry = ViewRegistry::new();
        let one = DocumentId::new("one.png").unwrap();
        let two = DocumentId::new("two.png").unwrap();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        registry.attach(&one, a);
        registry.attach(&two, b);

        assert_eq!(registry.view_count(&one), 1);
        assert_eq!(registry.view_count(&two), 1);
        assert_eq!(registry.total_views(), 2);
        assert_eq!(registry.detach(&two, a), Detached::NotAttached);
    }

    #[test]
    fn test_allocated_ids_are_unique() {
        let registry = ViewRegistry::new();
        let ids: BTreeSet<_> = (0..100).map(|_| registry.allocate_id()).collect();
        assert_eq!(ids.len(), 100);
    }
}
