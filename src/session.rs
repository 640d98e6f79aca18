//! Request/response sessions over one multiplexed connection.
//!
//! [`StreamingSession::connect`] splits a duplex transport and spawns three
//! tasks: the [`FrameWriter`](crate::sender::FrameWriter) draining outbound
//! frames, the [`PayloadReceiver`] reading inbound frames, and a router that
//! hands responses to the requests awaiting them and forwards peer requests
//! to [`IncomingRequests`]. Either peer may send requests; both sides use
//! the same session type.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wirestream::{
//!     ReceivedRequest,
//!     SessionConfig,
//!     StreamingRequest,
//!     StreamingResponse,
//!     StreamingSession,
//! };
//!
//! # async fn run() -> wirestream::Result<()> {
//! let (client_io, server_io) = tokio::io::duplex(64 * 1024);
//! let (server, incoming) = StreamingSession::connect(server_io, SessionConfig::default());
//! let handler = |request: ReceivedRequest| async move {
//!     StreamingResponse::ok().with_body(format!("you asked for {}", request.path))
//! };
//! tokio::spawn(async move { server.serve(incoming, Arc::new(handler)).await });
//!
//! let (client, _) = StreamingSession::connect(client_io, SessionConfig::default());
//! let response = client.send_request(StreamingRequest::get("/status")).await?;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{Stream, future::join_all};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    assembler::AssemblerRegistry,
    config::SessionConfig,
    disassembler::{DisassemblyError, DisassemblyOutcome, PayloadDisassembler},
    error::{Result, SessionError},
    header::PayloadId,
    message::{ContentStream, ReceivedRequest, ReceivedResponse, StreamingRequest, StreamingResponse},
    receiver::{PayloadReceiver, ReceivedPayload},
    sender::{PayloadSender, SendError},
};

mod pending;

use pending::{PendingGuard, PendingResponses};

/// Application callback answering peer requests.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the response for `request`.
    async fn handle(&self, request: ReceivedRequest) -> StreamingResponse;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(ReceivedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamingResponse> + Send + 'static,
{
    async fn handle(&self, request: ReceivedRequest) -> StreamingResponse { self(request).await }
}

/// Requests sent by the peer, in completion order.
///
/// Ends when the connection closes.
#[derive(Debug)]
pub struct IncomingRequests {
    rx: mpsc::Receiver<ReceivedRequest>,
}

impl IncomingRequests {
    /// Wait for the next request; `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ReceivedRequest> { self.rx.recv().await }
}

impl Stream for IncomingRequests {
    type Item = ReceivedRequest;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[derive(Debug)]
struct SessionInner {
    sender: PayloadSender,
    pending: Arc<PendingResponses>,
    registry: Arc<AssemblerRegistry>,
    config: SessionConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Cloneable handle to one multiplexed connection.
#[derive(Clone, Debug)]
pub struct StreamingSession {
    inner: Arc<SessionInner>,
}

impl StreamingSession {
    /// Start a session over `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn connect<T>(transport: T, config: SessionConfig) -> (Self, IncomingRequests)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let shutdown = CancellationToken::new();
        let registry = Arc::new(AssemblerRegistry::new(config.assembler_ttl()));
        let pending = Arc::new(PendingResponses::default());
        let (sender, writer) = PayloadSender::new(&config, shutdown.clone());
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity());
        let (request_tx, request_rx) = mpsc::channel(config.event_capacity());
        let receiver = PayloadReceiver::new(
            read_half,
            &config,
            Arc::clone(&registry),
            event_tx,
            shutdown.clone(),
        );

        let tasks = TaskTracker::new();
        tasks.spawn(async move {
            if let Err(e) = writer.run(write_half).await {
                warn!(error = %e, "frame writer stopped");
            }
        });
        tasks.spawn(async move {
            // The receiver logs its own failures.
            let _ = receiver.run().await;
        });
        tasks.spawn(route(
            event_rx,
            request_tx,
            Arc::clone(&pending),
            shutdown.clone(),
        ));
        tasks.close();

        info!(
            max_frame_payload = config.max_frame_payload(),
            "streaming session started"
        );
        let session = Self {
            inner: Arc::new(SessionInner {
                sender,
                pending,
                registry,
                config,
                shutdown,
                tasks,
            }),
        };
        (session, IncomingRequests { rx: request_rx })
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig { &self.inner.config }

    /// Send `request` and wait for the peer's response.
    ///
    /// The request metadata and every attached content stream are sent
    /// concurrently. The configured request timeout, if any, covers both
    /// sending and waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disassembly`] if sending fails,
    /// [`SessionError::Disconnected`] if the connection closes first, and
    /// [`SessionError::Timeout`] if the timeout elapses.
    pub async fn send_request(&self, request: StreamingRequest) -> Result<ReceivedResponse> {
        let exchange = self.exchange(request);
        match self.inner.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| SessionError::Timeout(limit))?,
            None => exchange.await,
        }
    }

    async fn exchange(&self, request: StreamingRequest) -> Result<ReceivedResponse> {
        let id = PayloadId::new();
        let response = self
            .inner
            .pending
            .register(id)
            .ok_or(SessionError::Disconnected)?;
        let _guard = PendingGuard {
            pending: Arc::clone(&self.inner.pending),
            id,
        };
        debug!(%id, verb = request.verb(), path = request.path(), "sending request");
        let (metadata, streams) = request.into_disassemblers(id, self.inner.config.metadata_format());
        self.send_message(metadata, streams).await?;
        response.await.map_err(|_| SessionError::Disconnected)
    }

    /// Answer the peer request `request_id` with `response`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disassembly`] if sending fails.
    pub async fn send_response(&self, request_id: PayloadId, response: StreamingResponse) -> Result<()> {
        debug!(id = %request_id, status_code = response.status_code(), "sending response");
        let (metadata, streams) =
            response.into_disassemblers(request_id, self.inner.config.metadata_format());
        self.send_message(metadata, streams).await
    }

    /// Send a standalone content stream.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disassembly`] if sending fails. A body read
    /// failure also sends a `CancelStream` for the stream's id.
    pub async fn send_stream(&self, stream: ContentStream) -> Result<DisassemblyOutcome> {
        self.send_content(stream, None).await
    }

    /// Tell the peer to abandon payload `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disassembly`] if the frame cannot be sent.
    pub async fn cancel_stream(&self, id: PayloadId) -> Result<()> {
        PayloadDisassembler::cancel_stream(id)
            .disassemble(&self.inner.sender)
            .await?;
        Ok(())
    }

    /// Tell the peer to abandon every payload in flight.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Disassembly`] if the frame cannot be sent.
    pub async fn cancel_all(&self) -> Result<()> {
        PayloadDisassembler::cancel_all()
            .disassemble(&self.inner.sender)
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        metadata: PayloadDisassembler,
        streams: Vec<ContentStream>,
    ) -> Result<()> {
        let head_done = CancellationToken::new();
        let head = async {
            let res = metadata.disassemble(&self.inner.sender).await;
            head_done.cancel();
            res
        };
        let (head, contents) = tokio::join!(
            head,
            join_all(
                streams
                    .into_iter()
                    .map(|stream| self.send_content(stream, Some(&head_done)))
            )
        );
        head?;
        contents.into_iter().try_for_each(|res| res.map(drop))
    }

    /// Send one content stream. If its body fails, a `CancelStream` follows
    /// once `after` (the owning message's metadata) is done, so the peer has
    /// claimed the stream by the time the cancel arrives.
    async fn send_content(
        &self,
        stream: ContentStream,
        after: Option<&CancellationToken>,
    ) -> Result<DisassemblyOutcome> {
        let id = stream.id();
        match stream.into_disassembler().disassemble(&self.inner.sender).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if matches!(err, DisassemblyError::Send(SendError::Body(_))) {
                    warn!(%id, error = %err, "content stream failed; cancelling it");
                    if let Some(after) = after {
                        after.cancelled().await;
                    }
                    if let Err(e) = self.cancel_stream(id).await {
                        debug!(%id, error = %e, "failed to send cancellation");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Answer every request from `incoming` with `handler`, one task per
    /// request, until the connection closes.
    pub async fn serve<H>(&self, mut incoming: IncomingRequests, handler: Arc<H>)
    where
        H: RequestHandler,
    {
        while let Some(request) = incoming.recv().await {
            let session = self.clone();
            let handler = Arc::clone(&handler);
            self.inner.tasks.spawn(async move {
                let id = request.id;
                let response = handler.handle(request).await;
                if let Err(e) = session.send_response(id, response).await {
                    warn!(%id, error = %e, "failed to send response");
                }
            });
        }
        debug!("incoming requests exhausted");
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.inner.sender.is_connected() }

    /// Frames written to the transport so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 { self.inner.sender.frames_sent() }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.inner.pending.len() }

    /// Number of inbound payloads still receiving frames.
    #[must_use]
    pub fn active_assemblers(&self) -> usize { self.inner.registry.active_len() }

    /// Close the connection. Pending requests fail with
    /// [`SessionError::Disconnected`] and inbound streams are aborted.
    pub fn close(&self) { self.inner.shutdown.cancel(); }

    /// Wait until the connection has closed and every session task has
    /// finished.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
        self.inner.tasks.wait().await;
    }
}

async fn route(
    mut events: mpsc::Receiver<ReceivedPayload>,
    requests: mpsc::Sender<ReceivedRequest>,
    pending: Arc<PendingResponses>,
    shutdown: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        match event {
            ReceivedPayload::Response(response) => {
                let id = response.id;
                if !pending.resolve(response) {
                    warn!(%id, "response for unknown or abandoned request");
                }
            }
            ReceivedPayload::Request(request) => {
                if requests.send(request).await.is_err() {
                    debug!("incoming requests dropped; discarding request");
                }
            }
        }
    }
    pending.fail_all();
    shutdown.cancel();
    info!("streaming session closed");
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, io, marker::PhantomData, time::Duration};

    use tokio::io::{DuplexStream, ReadBuf};

    use super::*;

    /// Transport that may move between threads but not be shared.
    struct Unshared {
        io: DuplexStream,
        _not_sync: PhantomData<Cell<()>>,
    }

    impl Unshared {
        fn new(io: DuplexStream) -> Self {
            Self {
                io,
                _not_sync: PhantomData,
            }
        }
    }

    impl AsyncRead for Unshared {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for Unshared {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.io).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_shutdown(cx)
        }
    }

    #[tokio::test]
    async fn transport_need_not_be_sync() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (server, incoming) =
            StreamingSession::connect(Unshared::new(server_io), SessionConfig::default());
        let handler = |request: ReceivedRequest| async move {
            StreamingResponse::ok().with_body(request.path)
        };
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(incoming, Arc::new(handler)).await }
        });
        let (client, _incoming) =
            StreamingSession::connect(Unshared::new(client_io), SessionConfig::default());

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            client.send_request(StreamingRequest::get("/unshared")),
        )
        .await
        .expect("response in time")
        .expect("response");
        assert!(response.is_success());

        client.close();
        tokio::time::timeout(Duration::from_secs(2), server.closed())
            .await
            .expect("server stops");
        serving.await.expect("serve task");
    }

    #[tokio::test]
    async fn close_fails_new_requests() {
        let (io, _peer) = tokio::io::duplex(1024);
        let (session, _incoming) = StreamingSession::connect(io, SessionConfig::default());
        session.close();
        tokio::time::timeout(Duration::from_secs(2), session.closed())
            .await
            .expect("session tasks stop");
        assert!(!session.is_connected());
        let err = session
            .send_request(StreamingRequest::get("/"))
            .await
            .expect_err("closed");
        assert!(err.is_disconnected());
    }

    #[tokio::test]
    async fn closure_handler_answers() {
        let handler = |request: ReceivedRequest| async move {
            StreamingResponse::ok().with_body(request.path)
        };
        let request = ReceivedRequest {
            id: PayloadId::new(),
            verb: "GET".into(),
            path: "/echo".into(),
            streams: Vec::new(),
        };
        let response = handler.handle(request).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.streams().len(), 1);
    }
}
