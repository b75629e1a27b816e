//! TCP connection driving a [`Replica`]

use std::time::Duration;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};
use sketchsync_core::{DocumentId, Stroke};
use sketchsync_protocol::{encode_into, FrameConfig, FrameDecoder, HostMessage};

use crate::error::{Result, ViewError};
use crate::replica::{Replica, ReplicaEvent};

/// How long request helpers wait for the matching reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A view connected to a sketchsync host over TCP
pub struct ViewClient {
    replica: Replica,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    reply_timeout: Duration,
}

impl ViewClient {
    /// Connect, open `document` and wait for its initial state
    pub async fn connect(addr: impl ToSocketAddrs, document: DocumentId) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            replica: Replica::new(document),
            reader,
            writer,
            decoder: FrameDecoder::with_config(&FrameConfig::default()),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        };
        client.wait_ready().await?;
        info!(doc_id = %client.replica.document(), revision = client.replica.revision(), "View ready");
        Ok(client)
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Local edits queue messages; call [`flush`](Self::flush) or one of the
    /// waiting helpers to send them.
    pub fn replica_mut(&mut self) -> &mut Replica {
        &mut self.replica
    }

    /// Send every message the replica queued
    pub async fn flush(&mut self) -> Result<()> {
        let messages = self.replica.drain_outgoing();
        if messages.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::new();
        for msg in &messages {
            debug!(msg = msg.name(), "Sending");
            encode_into(msg, &mut buf)?;
        }
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    /// Wait for the next replica event
    pub async fn next_event(&mut self) -> Result<ReplicaEvent> {
        loop {
            if let Some(event) = self.recv(None).await? {
                return Ok(event);
            }
        }
    }

    /// Next replica event if one arrives within `wait`
    pub async fn try_next_event(&mut self, wait: Duration) -> Result<Option<ReplicaEvent>> {
        self.recv(Some(wait)).await
    }

    /// Send queued edits and wait until the authoritative log holds every
    /// stroke this view submitted.
    ///
    /// With nothing submitted (undo, redo, or just listening) any log change
    /// will do. Updates from other views that do not yet include our strokes
    /// are applied and waited past.
    pub async fn sync(&mut self) -> Result<u64> {
        let submitted = self.replica.optimistic().to_vec();
        let baseline = self.replica.log().clone();
        let deadline = tokio::time::Instant::now() + self.reply_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(event) = self.recv(Some(remaining)).await? else {
                return Err(ViewError::Timeout);
            };

            match event {
                // Reset or resync: submitted strokes are either in it or gone
                ReplicaEvent::StateLoaded { revision } => return Ok(revision),
                ReplicaEvent::LogReplaced { revision } => {
                    if includes(self.replica.log(), &baseline, &submitted) {
                        return Ok(revision);
                    }
                    debug!(revision = revision, "Log moved without our strokes yet");
                }
                ReplicaEvent::Failed {
                    code,
                    message,
                    correlation_id: None,
                    ..
                } => return Err(ViewError::Host { code, message }),
                _ => {}
            }
        }
    }

    /// Fetch the materialized document bytes
    pub async fn materialize(&mut self) -> Result<Bytes> {
        let token = self.replica.request_materialize()?;
        let wait = self.reply_timeout;
        self.wait_for(wait, |event| match event {
            ReplicaEvent::Materialized { correlation_id, data } if *correlation_id == token => {
                Some(Ok(data.clone()))
            }
            event => failed_request(event, &token),
        })
        .await
    }

    /// Save the document, or a copy when `target` is given; returns the
    /// saved revision
    pub async fn save(&mut self, target: Option<DocumentId>) -> Result<u64> {
        let token = self.replica.save(target)?;
        let wait = self.reply_timeout;
        self.wait_for(wait, |event| match event {
            ReplicaEvent::Saved {
                correlation_id,
                revision,
                ..
            } if *correlation_id == token => Some(Ok(*revision)),
            event => failed_request(event, &token),
        })
        .await
    }

    /// Discard all edits on the host and wait for the reloaded state
    pub async fn revert(&mut self) -> Result<u64> {
        self.replica.revert()?;
        let wait = self.reply_timeout;
        self.wait_for(wait, |event| match event {
            ReplicaEvent::StateLoaded { revision } => Some(Ok(*revision)),
            ReplicaEvent::Failed {
                code,
                message,
                correlation_id: None,
                ..
            } => Some(Err(ViewError::Host {
                code: code.clone(),
                message: message.clone(),
            })),
            _ => None,
        })
        .await
    }

    /// Round trip to the host
    pub async fn ping(&mut self) -> Result<Duration> {
        let started = tokio::time::Instant::now();
        self.replica.ping();
        let wait = self.reply_timeout;
        self.wait_for(wait, |event| match event {
            ReplicaEvent::Pong => Some(Ok(())),
            _ => None,
        })
        .await?;
        Ok(started.elapsed())
    }

    /// Close the view and the connection
    pub async fn close(mut self) -> Result<()> {
        self.replica.close();
        self.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<()> {
        let wait = self.reply_timeout;
        self.wait_for(wait, |event| match event {
            ReplicaEvent::StateLoaded { .. } => Some(Ok(())),
            ReplicaEvent::Failed { code, message, .. } => Some(Err(ViewError::Host {
                code: code.clone(),
                message: message.clone(),
            })),
            _ => None,
        })
        .await
    }

    /// Feed events to `matcher` until it yields a result
    async fn wait_for<T, F>(&mut self, wait: Duration, mut matcher: F) -> Result<T>
    where
        F: FnMut(&ReplicaEvent) -> Option<Result<T>>,
    {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv(Some(remaining)).await? {
                Some(event) => {
                    if let Some(result) = matcher(&event) {
                        return result;
                    }
                }
                None => return Err(ViewError::Timeout),
            }
        }
    }

    /// Flush, then decode one event; `None` when `wait` runs out first
    async fn recv(&mut self, wait: Option<Duration>) -> Result<Option<ReplicaEvent>> {
        let deadline = wait.map(|wait| tokio::time::Instant::now() + wait);

        loop {
            self.flush().await?;

            while let Some(msg) = self.decoder.decode::<HostMessage>()? {
                debug!(msg = msg.name(), "Received");
                if let Some(event) = self.replica.handle(msg) {
                    // Attach queues Ready
                    self.flush().await?;
                    return Ok(Some(event));
                }
            }

            let mut buf = [0u8; 8192];
            let n = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.reader.read(&mut buf)).await {
                    Ok(read) => read?,
                    Err(_) => return Ok(None),
                },
                None => self.reader.read(&mut buf).await?,
            };
            if n == 0 {
                return Err(ViewError::Disconnected);
            }
            self.decoder.feed(&buf[..n]);
        }
    }
}

/// True when `log` gained every stroke of `submitted` over `baseline`
fn includes(log: &[Stroke], baseline: &[Stroke], submitted: &[Stroke]) -> bool {
    submitted.iter().all(|stroke| {
        let count = |strokes: &[Stroke]| strokes.iter().filter(|s| *s == stroke).count();
        count(log) >= count(baseline) + count(submitted)
    })
}

/// Error reply for the request identified by `token`
fn failed_request<T>(event: &ReplicaEvent, token: &str) -> Option<Result<T>> {
    match event {
        ReplicaEvent::Failed {
            code,
            message,
            correlation_id: Some(id),
            ..
        } if id == token => Some(Err(ViewError::Host {
            code: code.clone(),
            message: message.clone(),
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sketchsync_core::{Authority, LogSnapshot, Renderer};
    use sketchsync_storage::MemoryStorage;
    use sketchsync_transport::TcpServer;
    use tokio::net::TcpListener;

    struct EchoRenderer;

    #[async_trait::async_trait]
    impl Renderer for EchoRenderer {
        async fn render(&self, initial_content: Bytes, log: LogSnapshot) -> sketchsync_core::Result<Bytes> {
            let mut out = initial_content.to_vec();
            out.extend(format!("+{}", log.len()).into_bytes());
            Ok(Bytes::from(out))
        }
    }

    fn doc() -> DocumentId {
        DocumentId::new("cat.png").unwrap()
    }

    async fn start_host() -> (std::net::SocketAddr, Arc<Authority>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new().with_document(doc(), &b"blank"[..]));
        let authority = Arc::new(Authority::new(storage.clone(), Arc::new(EchoRenderer)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = TcpServer::new(authority.clone(), addr);
        tokio::spawn(async move { server.serve(listener).await });

        (addr, authority, storage)
    }

    async fn draw(client: &mut ViewClient, color: &str) {
        let replica = client.replica_mut();
        replica.begin_stroke(color).unwrap();
        replica.add_point((0.0, 0.0)).unwrap();
        replica.add_point((4.0, 4.0)).unwrap();
        replica.end_stroke().unwrap();
    }

    #[tokio::test]
    async fn test_connect_loads_initial_state() {
        let (addr, authority, _) = start_host().await;
        let client = ViewClient::connect(addr, doc()).await.unwrap();

        assert!(client.replica().is_ready());
        assert_eq!(client.replica().initial_content().as_ref(), b"blank");
        assert!(client.replica().log().is_empty());
        assert_eq!(authority.stats().view_count, 1);
    }

    #[tokio::test]
    async fn test_connect_to_missing_document() {
        let (addr, _, _) = start_host().await;
        let missing = DocumentId::new("missing.png").unwrap();

        match ViewClient::connect(addr, missing).await {
            Err(ViewError::Host { code, .. }) => assert_eq!(code, "NOT_FOUND"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_edits_converge_across_views() {
        let (addr, _, _) = start_host().await;
        let mut a = ViewClient::connect(addr, doc()).await.unwrap();
        let mut b = ViewClient::connect(addr, doc()).await.unwrap();

        draw(&mut a, "red").await;
        assert_eq!(a.sync().await.unwrap(), 1);
        assert_eq!(b.sync().await.unwrap(), 1);
        assert_eq!(a.replica().log(), b.replica().log());
        assert!(a.replica().optimistic().is_empty());

        b.replica_mut().undo().unwrap();
        assert_eq!(b.sync().await.unwrap(), 2);
        assert_eq!(a.sync().await.unwrap(), 2);
        assert!(a.replica().log().is_empty());

        a.replica_mut().redo().unwrap();
        a.sync().await.unwrap();
        b.sync().await.unwrap();
        assert_eq!(b.replica().log().len(), 1);
        assert_eq!(b.replica().log()[0].color(), "red");
    }

    #[tokio::test]
    async fn test_sync_waits_for_own_stroke() {
        let (addr, _, _) = start_host().await;
        let mut a = ViewClient::connect(addr, doc()).await.unwrap();
        let mut b = ViewClient::connect(addr, doc()).await.unwrap();

        // Blue lands first, so the first update `a` sees lacks its stroke
        draw(&mut b, "blue").await;
        assert_eq!(b.sync().await.unwrap(), 1);

        draw(&mut a, "red").await;
        assert_eq!(a.sync().await.unwrap(), 2);
        let colors: Vec<_> = a.replica().log().iter().map(|s| s.color().to_string()).collect();
        assert_eq!(colors, vec!["blue", "red"]);
    }

    #[test]
    fn test_includes_counts_duplicate_strokes() {
        let red = Stroke::new("red", vec![sketchsync_core::Point(0.0, 0.0)]).unwrap();
        let blue = Stroke::new("blue", vec![sketchsync_core::Point(0.0, 0.0)]).unwrap();

        let baseline = vec![red.clone()];
        assert!(!includes(&[red.clone(), blue.clone()], &baseline, &[red.clone()]));
        assert!(includes(&[red.clone(), blue, red.clone()], &baseline, &[red.clone()]));
        assert!(includes(&[], &[], &[]));
    }

    #[tokio::test]
    async fn test_materialize_and_save() {
        let (addr, _, storage) = start_host().await;
        let mut client = ViewClient::connect(addr, doc()).await.unwrap();

        draw(&mut client, "blue").await;
        client.sync().await.unwrap();

        let data = client.materialize().await.unwrap();
        assert_eq!(data.as_ref(), b"blank+1");

        let copy = DocumentId::new("copy.png").unwrap();
        assert_eq!(client.save(Some(copy.clone())).await.unwrap(), 1);
        assert_eq!(storage.get(&copy).unwrap().as_ref(), b"blank+1");
    }

    #[tokio::test]
    async fn test_nothing_to_undo_is_reported() {
        let (addr, _, _) = start_host().await;
        let mut client = ViewClient::connect(addr, doc()).await.unwrap();

        client.replica_mut().undo().unwrap();
        match client.sync().await {
            Err(ViewError::Host { code, .. }) => assert_eq!(code, "NOTHING_TO_UNDO"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_detaches() {
        let (addr, authority, _) = start_host().await;
        let client = ViewClient::connect(addr, doc()).await.unwrap();
        client.close().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while authority.is_open(&doc()) {
            assert!(tokio::time::Instant::now() < deadline, "document was not closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
