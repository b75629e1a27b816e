//! View session - the host side of one view's link to the authority

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use sketchsync_core::{Authority, DocumentEvent, DocumentId, Error, ViewId};
use sketchsync_protocol::{codes, FrameConfig, FrameDecoder, HostMessage, ProtocolError, ViewMessage};

use crate::rate_limit::{RateLimitConfig, RateLimiter};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Per-connection limits
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub frames: FrameConfig,
    pub rate_limit: RateLimitConfig,
}

/// Attachment state of a session
struct Attached {
    document: DocumentId,
    updates: broadcast::Receiver<DocumentEvent>,
    /// Set once the view asked for its initial state
    ready: bool,
    /// Highest revision forwarded to the view
    sent_revision: u64,
}

/// Handles the messages of a single view instance.
///
/// Replies to a request are returned from [`process`](Self::process).
/// Broadcast log updates and the results of spawned work (materialize, save,
/// revert) are delivered through [`next_message`](Self::next_message).
pub struct ViewSession {
    /// Connection label for logs
    pub client_id: String,
    view: ViewId,
    authority: Arc<Authority>,
    decoder: FrameDecoder,
    limiter: RateLimiter,
    attached: Option<Attached>,
    outbox_tx: mpsc::UnboundedSender<HostMessage>,
    outbox_rx: mpsc::UnboundedReceiver<HostMessage>,
    closed: bool,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl ViewSession {
    pub fn new(client_id: String, authority: Arc<Authority>) -> Self {
        Self::with_config(client_id, authority, &SessionConfig::default())
    }

    pub fn with_config(client_id: String, authority: Arc<Authority>, config: &SessionConfig) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let view = authority.registry().allocate_id();

        Self {
            client_id,
            view,
            authority,
            decoder: FrameDecoder::with_config(&config.frames),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            attached: None,
            outbox_tx,
            outbox_rx,
            closed: false,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Set the metrics collector
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn view_id(&self) -> ViewId {
        self.view
    }

    /// Document this view is attached to
    pub fn document(&self) -> Option<&DocumentId> {
        self.attached.as_ref().map(|a| &a.document)
    }

    /// True once the view sent `Close`
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Process incoming data and return direct replies
    pub async fn process(&mut self, data: &[u8]) -> Vec<HostMessage> {
        self.decoder.feed(data);
        let mut responses = Vec::new();

        loop {
            match self.decoder.decode::<ViewMessage>() {
                Ok(Some(msg)) => {
                    if let Some(response) = self.handle_message(msg).await {
                        responses.push(response);
                    }
                    if self.closed {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(client = %self.client_id, error = %e, "Undecodable frame");
                    responses.push(protocol_error(&e));
                }
            }
        }

        responses
    }

    /// Handle a single decoded message
    pub async fn handle_message(&mut self, msg: ViewMessage) -> Option<HostMessage> {
        debug!(client = %self.client_id, view = %self.view, msg = msg.name(), "Processing message");
        let started = Instant::now();
        let name = msg.name();

        if !self.limiter.try_acquire() {
            warn!(client = %self.client_id, msg = name, "Rate limited");
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.rate_limited_requests.inc();
            }
            return Some(HostMessage::error(codes::RATE_LIMITED, "Too many messages"));
        }

        let response = match msg {
            ViewMessage::Ping => Some(HostMessage::Pong),
            ViewMessage::Open { document } => Some(self.handle_open(document).await),
            ViewMessage::Close => {
                self.handle_close();
                None
            }
            ViewMessage::Ready => Some(self.handle_ready()),
            ViewMessage::SubmitEdit { record } => self
                .with_ready_document(|authority, id| authority.apply_edit(id, record).map(|_| ())),
            ViewMessage::RequestUndo => {
                self.with_ready_document(|authority, id| authority.undo(id).map(|_| ()))
            }
            ViewMessage::RequestRedo => {
                self.with_ready_document(|authority, id| authority.redo(id).map(|_| ()))
            }
            ViewMessage::RequestMaterializedData { correlation_id } => {
                self.handle_materialize(correlation_id)
            }
            ViewMessage::Save {
                correlation_id,
                target,
            } => self.handle_save(correlation_id, target),
            ViewMessage::Revert => self.handle_revert(),
        };

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_message(name, started.elapsed().as_secs_f64());
            if let Some(HostMessage::Error { code, .. }) = &response {
                metrics.record_error(name, code);
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = started;

        response
    }

    async fn handle_open(&mut self, document: DocumentId) -> HostMessage {
        if let Some(attached) = &self.attached {
            return HostMessage::error(
                codes::ALREADY_ATTACHED,
                format!("View already attached to {}", attached.document),
            );
        }

        match self.authority.attach(&document, self.view).await {
            Ok(attachment) => {
                info!(client = %self.client_id, view = %self.view, doc_id = %document, "View opened");
                self.attached = Some(Attached {
                    document: attachment.document.clone(),
                    updates: attachment.updates,
                    ready: false,
                    sent_revision: 0,
                });
                HostMessage::Attached {
                    view_id: self.view,
                    document: attachment.document,
                }
            }
            Err(e) => {
                warn!(client = %self.client_id, doc_id = %document, error = %e, "Open failed");
                HostMessage::error_from(&e, None)
            }
        }
    }

    fn handle_ready(&mut self) -> HostMessage {
        let Some(attached) = self.attached.as_mut() else {
            return not_attached();
        };

        match self.authority.snapshot(&attached.document) {
            Ok(snapshot) => {
                attached.ready = true;
                attached.sent_revision = snapshot.revision;
                HostMessage::InitialState {
                    revision: snapshot.revision,
                    initial_content: snapshot.initial_content,
                    log: snapshot.log,
                }
            }
            Err(e) => HostMessage::error_from(&e, None),
        }
    }

    fn handle_close(&mut self) {
        self.cleanup();
        self.closed = true;
        info!(client = %self.client_id, view = %self.view, "View closed");
    }

    /// Document of a view that received its initial state.
    ///
    /// Requests that change the log are refused until then.
    fn ready_document(&self) -> Result<&DocumentId, HostMessage> {
        match &self.attached {
            Some(attached) if attached.ready => Ok(&attached.document),
            Some(_) => Err(HostMessage::error(
                codes::NOT_READY,
                "Initial state not yet received",
            )),
            None => Err(not_attached()),
        }
    }

    /// Run a log mutation; success is observed through the broadcast
    fn with_ready_document<F>(&self, f: F) -> Option<HostMessage>
    where
        F: FnOnce(&Authority, &DocumentId) -> sketchsync_core::Result<()>,
    {
        let document = match self.ready_document() {
            Ok(document) => document,
            Err(reply) => return Some(reply),
        };

        match f(&self.authority, document) {
            Ok(()) => None,
            Err(e) => {
                if e.is_benign() {
                    debug!(client = %self.client_id, doc_id = %document, error = %e, "Request ignored");
                } else {
                    warn!(client = %self.client_id, doc_id = %document, error = %e, "Request rejected");
                }
                Some(HostMessage::error_from(&e, None))
            }
        }
    }

    fn handle_materialize(&self, correlation_id: String) -> Option<HostMessage> {
        let Some(attached) = &self.attached else {
            return Some(with_correlation(not_attached(), correlation_id));
        };

        let authority = self.authority.clone();
        let document = attached.document.clone();
        let outbox = self.outbox_tx.clone();
        #[cfg(feature = "metrics")]
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let reply = match authority.materialize(&document).await {
                Ok(data) => HostMessage::MaterializedDataResponse { correlation_id, data },
                Err(e) => {
                    warn!(doc_id = %document, error = %e, "Materialize failed");
                    HostMessage::error_from(&e, Some(correlation_id))
                }
            };
            #[cfg(feature = "metrics")]
            if let Some(metrics) = metrics {
                metrics.record_render(started.elapsed().as_secs_f64());
            }
            debug!(doc_id = %document, elapsed_ms = started.elapsed().as_millis() as u64, "Materialize finished");
            let _ = outbox.send(reply);
        });
        None
    }

    fn handle_save(&self, correlation_id: String, target: Option<DocumentId>) -> Option<HostMessage> {
        let Some(attached) = &self.attached else {
            return Some(with_correlation(not_attached(), correlation_id));
        };

        let authority = self.authority.clone();
        let document = attached.document.clone();
        let outbox = self.outbox_tx.clone();

        tokio::spawn(async move {
            let reply = match authority.save(&document, target.as_ref()).await {
                Ok(revision) => HostMessage::Saved {
                    correlation_id,
                    target: target.unwrap_or(document),
                    revision,
                },
                Err(e) => {
                    warn!(doc_id = %document, error = %e, "Save failed");
                    HostMessage::error_from(&e, Some(correlation_id))
                }
            };
            let _ = outbox.send(reply);
        });
        None
    }

    fn handle_revert(&self) -> Option<HostMessage> {
        let document = match self.ready_document() {
            Ok(document) => document.clone(),
            Err(reply) => return Some(reply),
        };

        let authority = self.authority.clone();
        let outbox = self.outbox_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = authority.revert(&document).await {
                warn!(doc_id = %document, error = %e, "Revert failed");
                let _ = outbox.send(HostMessage::error_from(&e, None));
            }
        });
        None
    }

    /// Next message to push to the view: a log update or a deferred reply.
    ///
    /// Cancel safe; pending forever while nothing is attached and no work
    /// is outstanding.
    pub async fn next_message(&mut self) -> HostMessage {
        let msg = tokio::select! {
            Some(msg) = self.outbox_rx.recv() => msg,
            msg = next_update(&mut self.attached, &self.authority, &self.client_id) => msg,
        };

        #[cfg(feature = "metrics")]
        if let (Some(metrics), HostMessage::LogUpdated { .. }) = (&self.metrics, &msg) {
            metrics.updates_forwarded.inc();
        }
        msg
    }

    /// Detach from the document, if attached
    pub fn cleanup(&mut self) {
        if let Some(attached) = self.attached.take() {
            let outcome = self.authority.detach(&attached.document, self.view);
            debug!(client = %self.client_id, view = %self.view, outcome = ?outcome, "Session detached");
        }
    }
}

impl Drop for ViewSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn next_update(slot: &mut Option<Attached>, authority: &Authority, client_id: &str) -> HostMessage {
    loop {
        let Some(attached) = slot.as_mut() else {
            return std::future::pending().await;
        };

        match attached.updates.recv().await {
            Ok(event) => {
                // Before Ready the view gets nothing; Ready sends a fresh snapshot
                if !attached.ready || event.revision <= attached.sent_revision {
                    continue;
                }
                attached.sent_revision = event.revision;
                return HostMessage::from_event(&event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(client = %client_id, doc_id = %attached.document, missed = missed, "View lagged behind updates, resending state");
                if !attached.ready {
                    continue;
                }
                match authority.snapshot(&attached.document) {
                    Ok(snapshot) => {
                        attached.sent_revision = snapshot.revision;
                        return HostMessage::InitialState {
                            revision: snapshot.revision,
                            initial_content: snapshot.initial_content,
                            log: snapshot.log,
                        };
                    }
                    Err(e) => return HostMessage::error_from(&e, None),
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!(client = %client_id, doc_id = %attached.document, "Document closed under an attached view");
                let document = attached.document.to_string();
                *slot = None;
                return HostMessage::error_from(&Error::DocumentNotOpen(document), None);
            }
        }
    }
}

fn not_attached() -> HostMessage {
    HostMessage::error(codes::NOT_ATTACHED, "No document open in this view")
}

fn with_correlation(msg: HostMessage, id: String) -> HostMessage {
    match msg {
        HostMessage::Error { code, message, .. } => HostMessage::Error {
            code,
            message,
            correlation_id: Some(id),
        },
        other => other,
    }
}

fn protocol_error(e: &ProtocolError) -> HostMessage {
    HostMessage::error(e.code(), e.to_string())
}
