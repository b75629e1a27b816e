//! WebSocket transport for sketchsync views
//!
//! Each text or binary frame carries one JSON message; the trailing newline
//! of the TCP framing is optional.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info};
use sketchsync_core::Authority;
use sketchsync_protocol::HostMessage;

use crate::session::{SessionConfig, ViewSession};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// WebSocket Server for sketchsync views
pub struct WebSocketServer {
    authority: Arc<Authority>,
    addr: SocketAddr,
    client_counter: AtomicU64,
    config: SessionConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl WebSocketServer {
    pub fn new(authority: Arc<Authority>, addr: SocketAddr) -> Self {
        Self {
            authority,
            addr,
            client_counter: AtomicU64::new(0),
            config: SessionConfig::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Set frame and rate limits applied to every connection
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the metrics collector
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the WebSocket server
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Sketchsync WebSocket server listening");
        self.serve(listener).await
    }

    /// Accept views on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client_id = format!(
                        "ws:{}:{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    );
                    let session = ViewSession::with_config(client_id.clone(), self.authority.clone(), &self.config);
                    #[cfg(feature = "metrics")]
                    let (session, metrics) = match &self.metrics {
                        Some(metrics) => (session.with_metrics(metrics.clone()), Some(metrics.clone())),
                        None => (session, None),
                    };

                    tokio::spawn(async move {
                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &metrics {
                            metrics.record_connection("websocket");
                        }

                        if let Err(e) = Self::handle_connection(stream, session).await {
                            error!(client = %client_id, error = %e, "WebSocket connection error");
                        }

                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &metrics {
                            metrics.record_disconnection("websocket");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(stream: TcpStream, mut session: ViewSession) -> Result<(), BoxError> {
        let ws_stream = accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();
        let client_id = session.client_id.clone();

        info!(client = %client_id, view = %session.view_id(), "WebSocket view connected");

        let result = loop {
            tokio::select! {
                // Handle incoming WebSocket messages
                msg = read.next() => {
                    let mut data = match msg {
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(client = %client_id, "WebSocket view disconnected");
                            break Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            error!(client = %client_id, error = %e, "WebSocket read error");
                            break Ok(());
                        }
                    };

                    // One message per frame
                    if !data.ends_with(b"\n") {
                        data.push(b'\n');
                    }

                    let mut failed = None;
                    for response in session.process(&data).await {
                        if let Err(e) = write.send(text_frame(&response)?).await {
                            failed = Some(e);
                            break;
                        }
                    }
                    if let Some(e) = failed {
                        break Err(e.into());
                    }
                    if session.is_closed() {
                        let _ = write.send(Message::Close(None)).await;
                        break Ok(());
                    }
                }

                // Broadcast log updates and deferred replies
                msg = session.next_message() => {
                    if let Err(e) = write.send(text_frame(&msg)?).await {
                        error!(client = %client_id, error = %e, "WebSocket write error");
                        break Err(e.into());
                    }
                }
            }
        };

        session.cleanup();
        result
    }
}

fn text_frame(msg: &HostMessage) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(msg)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sketchsync_core::{DocumentId, LogSnapshot, Renderer};
    use sketchsync_protocol::ViewMessage;
    use sketchsync_storage::MemoryStorage;
    use tokio_tungstenite::connect_async;

    struct NullRenderer;

    #[async_trait::async_trait]
    impl Renderer for NullRenderer {
        async fn render(&self, initial_content: Bytes, _log: LogSnapshot) -> sketchsync_core::Result<Bytes> {
            Ok(initial_content)
        }
    }

    #[tokio::test]
    async fn test_websocket_open_and_ready() {
        let doc = DocumentId::new("cat.png").unwrap();
        let storage = Arc::new(MemoryStorage::new().with_document(doc.clone(), &b"blank"[..]));
        let authority = Arc::new(Authority::new(storage, Arc::new(NullRenderer)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = WebSocketServer::new(authority.clone(), addr);
        tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let open = serde_json::to_string(&ViewMessage::Open { document: doc.clone() }).unwrap();
        ws.send(Message::Text(open)).await.unwrap();
        ws.send(Message::Text(r#"{"type":"ready"}"#.to_string())).await.unwrap();

        let mut replies = Vec::new();
        while replies.len() < 2 {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => replies.push(serde_json::from_str::<HostMessage>(&text).unwrap()),
                _ => continue,
            }
        }

        assert!(matches!(&replies[0], HostMessage::Attached { document, .. } if *document == doc));
        assert!(matches!(&replies[1], HostMessage::InitialState { revision: 0, .. }));
        assert_eq!(authority.stats().view_count, 1);
    }
}
