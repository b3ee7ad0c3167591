//! One TCP connection: state machine, read loop, serialized writer.
//!
//! ```text
//! Disconnected → Connecting → Connected → Closing → Closed
//! ```
//!
//! Both roles share the same machinery once the socket exists. Exactly one
//! task reads frames; each inbound message is matched against the pending
//! requests first and only then handed to the dispatcher. Writes go through a
//! single lock so frames never interleave.

use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::ipc::codec::FrameCodec;
use crate::ipc::correlation::CorrelationTable;
use crate::ipc::message::Message;
use crate::ipc::service::ServiceShared;
use crate::messages::{CatalogueMessage, Payload, Request};
use crate::types::{ConnectionId, CorrelationId, Error, HandlerExecution, ProtocolError, Result};

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Inbound request queued for the sequential handler worker.
type Job = (CorrelationId, Payload);

/// Lifecycle of a connection. Ordered: a connection only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection left `Connected`.
#[derive(Debug)]
enum CloseReason {
    Requested,
    PeerClosed,
    Transport(String),
    Protocol(ProtocolError),
    TooManyProtocolErrors(u32),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed locally"),
            CloseReason::PeerClosed => f.write_str("peer closed the stream"),
            CloseReason::Transport(e) => write!(f, "transport failure: {}", e),
            CloseReason::Protocol(e) => write!(f, "unrecoverable framing error: {}", e),
            CloseReason::TooManyProtocolErrors(n) => {
                write!(f, "{} consecutive protocol errors", n)
            }
        }
    }
}

impl From<Error> for CloseReason {
    fn from(err: Error) -> Self {
        match err {
            Error::Protocol(e) => CloseReason::Protocol(e),
            other => CloseReason::Transport(other.to_string()),
        }
    }
}

struct ConnectionInner {
    id: ConnectionId,
    peer: SocketAddr,
    shared: Arc<ServiceShared>,
    writer: Mutex<Option<FrameWriter>>,
    pending: CorrelationTable,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

/// Cancels the connection when the last user handle goes away.
struct HandleGuard {
    cancel: CancellationToken,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a live (or finished) connection. Cheap to clone.
///
/// Dropping every handle returned by `connect` (or held by the server) closes
/// the connection. Clones used by the read loop and handler tasks do not keep
/// it open.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    handle: Option<Arc<HandleGuard>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("state", &self.state())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl Connection {
    /// Client role: open a socket to `addr` within `connect_timeout`.
    pub(crate) async fn connect(
        addr: impl ToSocketAddrs,
        shared: Arc<ServiceShared>,
    ) -> Result<Self> {
        shared.config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        state.send_replace(ConnectionState::Connecting);

        let connect_timeout = shared.config.connect_timeout;
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::timeout(format!("connect timed out after {:?}", connect_timeout))
            })??;
        let peer = stream.peer_addr()?;

        Ok(Self::start(stream, peer, shared, state))
    }

    /// Server role: wrap an accepted socket.
    pub(crate) fn accept(stream: TcpStream, peer: SocketAddr, shared: Arc<ServiceShared>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self::start(stream, peer, shared, state)
    }

    fn start(
        stream: TcpStream,
        peer: SocketAddr,
        shared: Arc<ServiceShared>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }

        let codec = FrameCodec::new().with_max_frame_bytes(shared.config.max_frame_bytes as usize);
        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, codec.clone());
        let writer = FramedWrite::new(write_half, codec);
        let execution = shared.config.handler_execution;

        state.send_replace(ConnectionState::Connected);
        let cancel = CancellationToken::new();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                peer,
                shared,
                writer: Mutex::new(Some(writer)),
                pending: CorrelationTable::new(),
                state,
                cancel: cancel.clone(),
            }),
            handle: Some(Arc::new(HandleGuard { cancel })),
        };
        tracing::info!("Connection {} to {} established", connection.id(), peer);

        let jobs = match execution {
            HandlerExecution::Sequential => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(connection.task_handle().handler_worker(rx));
                Some(tx)
            }
            HandlerExecution::Concurrent => None,
        };
        tokio::spawn(connection.task_handle().read_loop(reader, jobs));

        connection
    }

    /// Clone for internal tasks; does not count as a user handle.
    fn task_handle(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: None,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Requests written on this connection still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send a payload and wait for the message answering it, using the
    /// configured request timeout.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<Payload> {
        let timeout = self.inner.shared.config.request_timeout;
        self.send_with_timeout(payload, timeout).await
    }

    /// Send a payload and wait at most `timeout` for its response.
    pub async fn send_with_timeout(
        &self,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<Payload> {
        if !self.is_connected() {
            return Err(Error::ConnectionClosed);
        }

        let payload = payload.into();
        let (type_tag, fields) = self.inner.shared.registry.encode_payload(&payload)?;
        let id = CorrelationId::new();

        // Registered before the write so a fast response always finds its waiter.
        let pending = self.inner.pending.register(id.clone(), timeout)?;
        self.write_message(Message::new(id, type_tag, fields)).await?;
        pending.wait().await
    }

    /// Typed request: the response must be the request's paired type.
    pub async fn request<R: Request>(&self, request: R) -> Result<R::Response> {
        let timeout = self.inner.shared.config.request_timeout;
        self.request_with_timeout(request, timeout).await
    }

    pub async fn request_with_timeout<R: Request>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response> {
        let response = self.send_with_timeout(request, timeout).await?;
        R::Response::try_from(response).map_err(|other| {
            Error::from(ProtocolError::UnexpectedResponse {
                expected: R::Response::TYPE_TAG.to_string(),
                actual: other.type_tag().to_string(),
            })
        })
    }

    /// Close the connection and wait until it reaches `Closed`.
    ///
    /// Pending requests fail with `ConnectionClosed`. Idempotent.
    pub async fn close(&self) {
        self.shutdown(CloseReason::Requested).await;
        self.closed().await;
    }

    /// Resolves once the connection is `Closed`, whoever closed it.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await
            .map(drop);
    }

    async fn shutdown(&self, reason: CloseReason) {
        let initiated = self.inner.state.send_if_modified(|state| {
            if *state >= ConnectionState::Closing {
                return false;
            }
            *state = ConnectionState::Closing;
            true
        });
        if !initiated {
            return;
        }

        tracing::debug!("Connection {} closing: {}", self.id(), reason);
        self.inner.cancel.cancel();
        let failed = self.inner.pending.close();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let write_timeout = self.inner.shared.config.write_timeout;
            let closing = SinkExt::<Message>::close(&mut writer);
            match tokio::time::timeout(write_timeout, closing).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Connection {} shutdown: {}", self.id(), e),
                Err(_) => tracing::debug!("Connection {} shutdown timed out", self.id()),
            }
        }

        self.inner.state.send_replace(ConnectionState::Closed);
        tracing::info!(
            "Connection {} to {} closed ({}), {} pending requests failed",
            self.id(),
            self.inner.peer,
            reason,
            failed
        );
    }

    /// Write one frame. A transport failure closes the connection.
    async fn write_message(&self, message: Message) -> Result<()> {
        let write_timeout = self.inner.shared.config.write_timeout;
        let result = {
            let mut guard = self.inner.writer.lock().await;
            let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;
            match tokio::time::timeout(write_timeout, writer.send(message)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Write timeout ({:?}), dropping connection", write_timeout);
                    Err(Error::Transport(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "write timeout",
                    )))
                }
            }
        };

        if let Err(Error::Transport(e)) = &result {
            self.shutdown(CloseReason::Transport(e.to_string())).await;
        }
        result
    }

    async fn read_loop(self, mut reader: FrameReader, jobs: Option<mpsc::UnboundedSender<Job>>) {
        let max_errors = self.inner.shared.config.max_consecutive_protocol_errors;
        let mut consecutive_errors = 0u32;

        let reason = loop {
            let next = tokio::select! {
                _ = self.inner.cancel.cancelled() => break CloseReason::Requested,
                next = reader.next() => next,
            };

            let outcome = match next {
                None => break CloseReason::PeerClosed,
                Some(Err(err)) => break CloseReason::from(err),
                Some(Ok(Err(err))) => Err(Error::from(err)),
                Some(Ok(Ok(message))) => self.route_inbound(message, jobs.as_ref()),
            };

            match outcome {
                Ok(()) => consecutive_errors = 0,
                Err(Error::Protocol(err)) if err.is_unroutable() => {
                    tracing::warn!("Connection {} ignored frame: {}", self.id(), err);
                }
                Err(err) => {
                    consecutive_errors += 1;
                    tracing::warn!("Connection {} dropped frame: {}", self.id(), err);
                    if consecutive_errors >= max_errors {
                        break CloseReason::TooManyProtocolErrors(consecutive_errors);
                    }
                }
            }
        };

        drop(jobs);
        self.shutdown(reason).await;
    }

    /// Pending requests first, then handlers.
    fn route_inbound(
        &self,
        message: Message,
        jobs: Option<&mpsc::UnboundedSender<Job>>,
    ) -> Result<()> {
        let Message {
            id,
            type_tag,
            fields,
        } = message;
        let shared = &self.inner.shared;

        if self.inner.pending.contains(&id) {
            return match shared.registry.decode_payload(&type_tag, fields) {
                Ok(payload) => {
                    self.inner.pending.resolve(&id, Ok(payload));
                    Ok(())
                }
                Err(err) => {
                    self.inner.pending.resolve(&id, Err(err));
                    Err(ProtocolError::MalformedFrame(format!(
                        "undecodable {} answering {}",
                        type_tag, id
                    ))
                    .into())
                }
            };
        }

        let payload = shared.registry.decode_payload(&type_tag, fields)?;
        let canonical = payload.type_tag();
        if !shared.dispatcher.contains(canonical) {
            if shared.registry.is_response(canonical) {
                tracing::debug!("Discarding late {} {}", canonical, id);
                return Ok(());
            }
            return Err(ProtocolError::UnhandledType(canonical.to_string()).into());
        }

        match jobs {
            Some(jobs) => jobs
                .send((id, payload))
                .map_err(|_| Error::ConnectionClosed)?,
            None => {
                let connection = self.task_handle();
                tokio::spawn(async move { connection.run_handler(id, payload).await });
            }
        }
        Ok(())
    }

    async fn handler_worker(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                job = jobs.recv() => job,
            };
            let Some((id, payload)) = job else { break };
            self.run_handler(id, payload).await;
        }
    }

    async fn run_handler(&self, id: CorrelationId, request: Payload) {
        let shared = &self.inner.shared;
        let request_tag = request.type_tag().to_string();

        let response = match shared.dispatcher.dispatch(&shared.registry, request).await {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Dropped {} {}: {}", request_tag, id, e);
                return;
            }
        };

        if let Err(e) = self.reply(id, &response).await {
            tracing::warn!("Failed to answer {}: {}", request_tag, e);
        }
    }

    async fn reply(&self, id: CorrelationId, response: &Payload) -> Result<()> {
        let (type_tag, fields) = self.inner.shared.registry.encode_payload(response)?;
        self.write_message(Message::new(id, type_tag, fields)).await
    }
}
