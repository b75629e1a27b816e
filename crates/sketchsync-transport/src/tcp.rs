//! TCP transport for sketchsync views

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};
use sketchsync_core::Authority;
use sketchsync_protocol::{encode_into, HostMessage};

use crate::session::{SessionConfig, ViewSession};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// TCP Server for sketchsync views
pub struct TcpServer {
    authority: Arc<Authority>,
    addr: SocketAddr,
    client_counter: AtomicU64,
    config: SessionConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl TcpServer {
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

    /// Start the TCP server
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Sketchsync TCP server listening");
        self.serve(listener).await
    }

    /// Accept views on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client_id = format!(
                        "tcp:{}:{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    );
                    let session = self.new_session(client_id.clone());
                    #[cfg(feature = "metrics")]
                    let metrics = self.metrics.clone();

                    tokio::spawn(async move {
                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &metrics {
                            metrics.record_connection("tcp");
                        }

                        if let Err(e) = Self::handle_connection(stream, session).await {
                            error!(client = %client_id, error = %e, "Connection error");
                        }

                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &metrics {
                            metrics.record_disconnection("tcp");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn new_session(&self, client_id: String) -> ViewSession {
        let session = ViewSession::with_config(client_id, self.authority.clone(), &self.config);
        #[cfg(feature = "metrics")]
        let session = match &self.metrics {
            Some(metrics) => session.with_metrics(metrics.clone()),
            None => session,
        };
        session
    }

    async fn handle_connection(mut stream: TcpStream, mut session: ViewSession) -> Result<(), BoxError> {
        let client_id = session.client_id.clone();
        info!(client = %client_id, view = %session.view_id(), "View connected");

        let mut buf = vec![0u8; 8192];

        let result = loop {
            tokio::select! {
                // Handle incoming frames from the view
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            info!(client = %client_id, "View disconnected");
                            break Ok(());
                        }
                        Ok(n) => {
                            let responses = session.process(&buf[..n]).await;
                            if let Err(e) = write_messages(&mut stream, &responses).await {
                                break Err(e);
                            }
                            if session.is_closed() {
                                break Ok(());
                            }
                        }
                        Err(e) => {
                            error!(client = %client_id, error = %e, "Read error");
                            break Ok(());
                        }
                    }
                }

                // Broadcast log updates and deferred replies
                msg = session.next_message() => {
                    if let Err(e) = write_messages(&mut stream, std::slice::from_ref(&msg)).await {
                        error!(client = %client_id, error = %e, "Write error");
                        break Err(e);
                    }
                }
            }
        };

        session.cleanup();
        result
    }
}

async fn write_messages(stream: &mut TcpStream, messages: &[HostMessage]) -> Result<(), BoxError> {
    if messages.is_empty() {
        return Ok(());
    }

    let mut buf = BytesMut::new();
    for msg in messages {
        encode_into(msg, &mut buf)?;
    }
    stream.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sketchsync_core::{DocumentId, LogSnapshot, Point, Renderer, Stroke};
    use sketchsync_protocol::{encode, ViewMessage};
    use sketchsync_storage::MemoryStorage;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

    struct CountingRenderer;

    #[async_trait::async_trait]
    impl Renderer for CountingRenderer {
        async fn render(&self, initial_content: Bytes, log: LogSnapshot) -> sketchsync_core::Result<Bytes> {
            Ok(Bytes::from(format!("{}:{}", initial_content.len(), log.len())))
        }
    }

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read, writer) = stream.into_split();
            Self {
                lines: BufReader::new(read).lines(),
                writer,
            }
        }

        async fn send(&mut self, msg: &ViewMessage) {
            self.writer.write_all(&encode(msg).unwrap()).await.unwrap();
        }

        async fn recv(&mut self) -> HostMessage {
            let line = tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("timed out")
                .unwrap()
                .expect("connection closed");
            serde_json::from_str(&line).unwrap()
        }
    }

    async fn start_server() -> (SocketAddr, Arc<Authority>) {
        let doc = DocumentId::new("cat.png").unwrap();
        let storage = Arc::new(MemoryStorage::new().with_document(doc, &b"blank"[..]));
        let authority = Arc::new(Authority::new(storage, Arc::new(CountingRenderer)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = TcpServer::new(authority.clone(), addr);
        tokio::spawn(async move { server.serve(listener).await });

        (addr, authority)
    }

    async fn open_view(addr: SocketAddr) -> Client {
        let mut client = Client::connect(addr).await;
        client
            .send(&ViewMessage::Open {
                document: DocumentId::new("cat.png").unwrap(),
            })
            .await;
        assert!(matches!(client.recv().await, HostMessage::Attached { .. }));

        client.send(&ViewMessage::Ready).await;
        match client.recv().await {
            HostMessage::InitialState { initial_content, .. } => {
                assert_eq!(initial_content.as_ref(), b"blank");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        client
    }

    #[tokio::test]
    async fn test_tcp_ping_pong() {
        let (addr, _) = start_server().await;
        let mut client = Client::connect(addr).await;

        client.send(&ViewMessage::Ping).await;
        assert_eq!(client.recv().await, HostMessage::Pong);
    }

    #[tokio::test]
    async fn test_two_views_observe_each_others_edits() {
        let (addr, authority) = start_server().await;
        let mut a = open_view(addr).await;
        let mut b = open_view(addr).await;

        let stroke = Stroke::new("red", vec![Point(0.0, 0.0), Point(1.0, 1.0)]).unwrap();
        a.send(&ViewMessage::SubmitEdit { record: stroke.clone() }).await;

        for client in [&mut a, &mut b] {
            match client.recv().await {
                HostMessage::LogUpdated { revision, log } => {
                    assert_eq!(revision, 1);
                    assert_eq!(log.to_vec(), vec![stroke.clone()]);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }

        // Undo from the other view reaches both
        b.send(&ViewMessage::RequestUndo).await;
        for client in [&mut a, &mut b] {
            match client.recv().await {
                HostMessage::LogUpdated { revision, log } => {
                    assert_eq!(revision, 2);
                    assert!(log.is_empty());
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }

        a.send(&ViewMessage::RequestMaterializedData {
            correlation_id: "m1".into(),
        })
        .await;
        match a.recv().await {
            HostMessage::MaterializedDataResponse { correlation_id, data } => {
                assert_eq!(correlation_id, "m1");
                assert_eq!(data.as_ref(), b"blank");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        assert_eq!(authority.stats().view_count, 2);
    }

    #[tokio::test]
    async fn test_disconnect_detaches_view() {
        let (addr, authority) = start_server().await;
        let a = open_view(addr).await;
        let mut b = open_view(addr).await;
        assert_eq!(authority.stats().view_count, 2);

        drop(a);

        // The server notices the closed socket asynchronously
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while authority.stats().view_count != 1 {
            assert!(tokio::time::Instant::now() < deadline, "view was not detached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        b.send(&ViewMessage::Close).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while authority.is_open(&DocumentId::new("cat.png").unwrap()) {
            assert!(tokio::time::Instant::now() < deadline, "document was not closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
