//! Sketchsync Core - Edit Log and Document Authority
//!
//! This crate provides the core functionality for sketchsync:
//! - Stroke records and the append/truncate-only edit log
//! - Per-document undo/redo history with revisions
//! - The authority that serializes edits and fans out log updates
//! - Collaborator seams for storage and rendering

pub mod authority;
pub mod collab;
pub mod color;
pub mod document;
pub mod error;
pub mod log;
pub mod registry;
pub mod stroke;

pub use authority::{Attachment, Authority, AuthorityConfig, AuthorityStats, DocumentSnapshot};
pub use collab::{ContentStore, Renderer};
pub use color::{parse_color, Rgba};
pub use document::{Document, DocumentEvent, DocumentId, DocumentMeta, EditKind, History};
pub use error::{Error, Result};
pub use log::{EditLog, LogSnapshot};
pub use registry::{Detached, ViewId, ViewRegistry};
pub use stroke::{Point, Stroke};
