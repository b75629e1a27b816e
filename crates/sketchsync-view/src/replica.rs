//! View replica: one view's local projection of a document
//!
//! The replica never talks to the network itself. Host messages are fed in
//! through [`Replica::handle`] and the messages the view wants to send are
//! queued until [`Replica::drain_outgoing`].

use std::collections::{HashMap, VecDeque};
use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;
use sketchsync_core::{DocumentId, LogSnapshot, Point, Stroke, ViewId};
use sketchsync_protocol::{HostMessage, ViewMessage};

use crate::error::{Result, ViewError};

/// Lifecycle of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `Open` queued, waiting for `Attached`
    Opening,
    /// Attached, waiting for the initial state
    Loading,
    /// Initial state received; input is accepted
    Ready,
    Closed,
}

/// A correlated request still waiting for its reply
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRequest {
    Materialize,
    Save { target: Option<DocumentId> },
}

/// What changed after handling a host message
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    Attached { view_id: ViewId },
    /// Initial content and log were installed (first load, revert or resync)
    StateLoaded { revision: u64 },
    LogReplaced { revision: u64 },
    Materialized { correlation_id: String, data: Bytes },
    Saved { correlation_id: String, target: DocumentId, revision: u64 },
    Failed {
        code: String,
        message: String,
        correlation_id: Option<String>,
        request: Option<PendingRequest>,
    },
    Pong,
}

/// Stroke being drawn
#[derive(Debug)]
struct StrokeBuilder {
    color: String,
    points: Vec<Point>,
    /// False for gestures started before the initial state arrived
    submit: bool,
}

pub struct Replica {
    document: DocumentId,
    view_id: Option<ViewId>,
    phase: Phase,
    revision: u64,
    initial_content: Bytes,
    log: LogSnapshot,
    optimistic: Vec<Stroke>,
    current: Option<StrokeBuilder>,
    pending: HashMap<String, PendingRequest>,
    outgoing: VecDeque<ViewMessage>,
}

impl Replica {
    /// Create a replica for `document` and queue its `Open`
    pub fn new(document: DocumentId) -> Self {
        let mut outgoing = VecDeque::new();
        outgoing.push_back(ViewMessage::Open {
            document: document.clone(),
        });

        Self {
            document,
            view_id: None,
            phase: Phase::Opening,
            revision: 0,
            initial_content: Bytes::new(),
            log: LogSnapshot::default(),
            optimistic: Vec::new(),
            current: None,
            pending: HashMap::new(),
            outgoing,
        }
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn view_id(&self) -> Option<ViewId> {
        self.view_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Revision of the last authoritative state applied
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn initial_content(&self) -> &Bytes {
        &self.initial_content
    }

    /// Last authoritative log
    pub fn log(&self) -> &LogSnapshot {
        &self.log
    }

    /// Submitted strokes not yet confirmed by a log update
    pub fn optimistic(&self) -> &[Stroke] {
        &self.optimistic
    }

    /// Color and points of the stroke being drawn
    pub fn current_stroke(&self) -> Option<(&str, &[Point])> {
        self.current
            .as_ref()
            .map(|builder| (builder.color.as_str(), builder.points.as_slice()))
    }

    /// Finished strokes in paint order: authoritative first, then optimistic
    pub fn strokes(&self) -> impl Iterator<Item = &Stroke> {
        self.log.iter().chain(self.optimistic.iter())
    }

    pub fn pending(&self) -> &HashMap<String, PendingRequest> {
        &self.pending
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Take every queued message, in order
    pub fn drain_outgoing(&mut self) -> Vec<ViewMessage> {
        self.outgoing.drain(..).collect()
    }

    /// Apply a host message to the local state
    pub fn handle(&mut self, msg: HostMessage) -> Option<ReplicaEvent> {
        if self.phase == Phase::Closed {
            debug!(doc_id = %self.document, msg = msg.name(), "Replica closed, message dropped");
            return None;
        }

        match msg {
            HostMessage::Attached { view_id, document } => {
                if self.phase != Phase::Opening {
                    warn!(doc_id = %self.document, "Unexpected attach acknowledgement");
                    return None;
                }
                if document != self.document {
                    warn!(doc_id = %self.document, attached = %document, "Attached to a different document");
                }
                info!(doc_id = %self.document, view = %view_id, "View attached");
                self.view_id = Some(view_id);
                self.phase = Phase::Loading;
                self.outgoing.push_back(ViewMessage::Ready);
                Some(ReplicaEvent::Attached { view_id })
            }

            HostMessage::InitialState {
                revision,
                initial_content,
                log,
            } => {
                if self.phase == Phase::Ready && revision < self.revision {
                    debug!(doc_id = %self.document, revision = revision, held = self.revision, "Stale initial state dropped");
                    return None;
                }
                debug!(doc_id = %self.document, revision = revision, len = log.len(), "Initial state installed");
                self.phase = Phase::Ready;
                self.revision = revision;
                self.initial_content = initial_content;
                self.log = log;
                self.optimistic.clear();
                Some(ReplicaEvent::StateLoaded { revision })
            }

            HostMessage::LogUpdated { revision, log } => {
                if self.phase != Phase::Ready {
                    debug!(doc_id = %self.document, revision = revision, "Log update before initial state dropped");
                    return None;
                }
                // Full-log updates make re-delivery a no-op
                if revision <= self.revision {
                    debug!(doc_id = %self.document, revision = revision, held = self.revision, "Stale log update dropped");
                    return None;
                }
                self.revision = revision;
                self.log = log;
                self.optimistic.clear();
                Some(ReplicaEvent::LogReplaced { revision })
            }

            HostMessage::MaterializedDataResponse { correlation_id, data } => {
                match self.pending.remove(&correlation_id) {
                    Some(PendingRequest::Materialize) => Some(ReplicaEvent::Materialized { correlation_id, data }),
                    other => {
                        self.restore_pending(&correlation_id, other);
                        None
                    }
                }
            }

            HostMessage::Saved {
                correlation_id,
                target,
                revision,
            } => match self.pending.remove(&correlation_id) {
                Some(PendingRequest::Save { .. }) => Some(ReplicaEvent::Saved {
                    correlation_id,
                    target,
                    revision,
                }),
                other => {
                    self.restore_pending(&correlation_id, other);
                    None
                }
            },

            HostMessage::Error {
                code,
                message,
                correlation_id,
            } => {
                let request = correlation_id.as_ref().and_then(|id| self.pending.remove(id));
                warn!(doc_id = %self.document, code = %code, message = %message, "Host reported an error");
                // Uncorrelated errors answer edits; a rejected stroke will
                // never appear in a log update, so stop drawing it. Strokes
                // that were accepted come back with the next update.
                if correlation_id.is_none() && !self.optimistic.is_empty() {
                    debug!(doc_id = %self.document, dropped = self.optimistic.len(), "Optimistic strokes rolled back");
                    self.optimistic.clear();
                }
                Some(ReplicaEvent::Failed {
                    code,
                    message,
                    correlation_id,
                    request,
                })
            }

            HostMessage::Pong => Some(ReplicaEvent::Pong),
        }
    }

    fn restore_pending(&mut self, correlation_id: &str, request: Option<PendingRequest>) {
        warn!(doc_id = %self.document, correlation_id = %correlation_id, "Reply does not match a pending request");
        if let Some(request) = request {
            self.pending.insert(correlation_id.to_string(), request);
        }
    }

    /// Start a gesture
    pub fn begin_stroke(&mut self, color: impl Into<String>) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(ViewError::Closed);
        }
        if self.current.is_some() {
            return Err(ViewError::StrokeInProgress);
        }

        self.current = Some(StrokeBuilder {
            color: color.into(),
            points: Vec::new(),
            submit: self.phase == Phase::Ready,
        });
        Ok(())
    }

    /// Extend the stroke being drawn
    pub fn add_point(&mut self, point: impl Into<Point>) -> Result<()> {
        let builder = self.current.as_mut().ok_or(ViewError::NoStroke)?;
        builder.points.push(point.into());
        Ok(())
    }

    /// Finish the gesture: freeze the stroke, show it optimistically and
    /// queue it for submission.
    ///
    /// Returns `None` when nothing is submitted: the gesture had no points or
    /// began before the initial state arrived.
    pub fn end_stroke(&mut self) -> Result<Option<Stroke>> {
        let builder = self.current.take().ok_or(ViewError::NoStroke)?;
        if builder.points.is_empty() {
            return Ok(None);
        }

        let stroke = Stroke::new(builder.color, builder.points)?;
        if !builder.submit || self.phase != Phase::Ready {
            debug!(doc_id = %self.document, "Gesture drawn before initial state kept local");
            return Ok(None);
        }

        self.optimistic.push(stroke.clone());
        self.outgoing.push_back(ViewMessage::SubmitEdit {
            record: stroke.clone(),
        });
        Ok(Some(stroke))
    }

    /// Drop the stroke being drawn, if any
    pub fn cancel_stroke(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn undo(&mut self) -> Result<()> {
        self.require_ready()?;
        self.outgoing.push_back(ViewMessage::RequestUndo);
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        self.require_ready()?;
        self.outgoing.push_back(ViewMessage::RequestRedo);
        Ok(())
    }

    /// Ask the host to discard every edit and reload the document
    pub fn revert(&mut self) -> Result<()> {
        self.require_ready()?;
        self.outgoing.push_back(ViewMessage::Revert);
        Ok(())
    }

    /// Request the materialized document bytes; returns the correlation id
    pub fn request_materialize(&mut self) -> Result<String> {
        self.require_attached()?;
        let correlation_id = new_correlation_id();
        self.pending
            .insert(correlation_id.clone(), PendingRequest::Materialize);
        self.outgoing.push_back(ViewMessage::RequestMaterializedData {
            correlation_id: correlation_id.clone(),
        });
        Ok(correlation_id)
    }

    /// Request a save, to `target` or to the document itself
    pub fn save(&mut self, target: Option<DocumentId>) -> Result<String> {
        self.require_attached()?;
        let correlation_id = new_correlation_id();
        self.pending.insert(
            correlation_id.clone(),
            PendingRequest::Save {
                target: target.clone(),
            },
        );
        self.outgoing.push_back(ViewMessage::Save {
            correlation_id: correlation_id.clone(),
            target,
        });
        Ok(correlation_id)
    }

    pub fn ping(&mut self) {
        if self.phase != Phase::Closed {
            self.outgoing.push_back(ViewMessage::Ping);
        }
    }

    /// Close the view. A stroke in progress is discarded, never submitted.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }

        if self.current.take().is_some() {
            debug!(doc_id = %self.document, "Discarding stroke in progress");
        }
        self.optimistic.clear();
        self.pending.clear();
        self.phase = Phase::Closed;
        self.outgoing.push_back(ViewMessage::Close);
        info!(doc_id = %self.document, "View closed");
    }

    fn require_ready(&self) -> Result<()> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Closed => Err(ViewError::Closed),
            Phase::Opening | Phase::Loading => Err(ViewError::NotReady),
        }
    }

    fn require_attached(&self) -> Result<()> {
        match self.phase {
            Phase::Loading | Phase::Ready => Ok(()),
            Phase::Closed => Err(ViewError::Closed),
            Phase::Opening => Err(ViewError::NotReady),
        }
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
