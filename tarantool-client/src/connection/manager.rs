//! Connection lifecycle: reconnector, request submission and failure handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tarantool_core::protocol::{encode_request, Packet, PacketCodec, Request};
use tarantool_core::{Result, TarantoolError};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;

use super::call::{Call, CallFuture};
use super::handshake::{self, Handshake};
use super::pending::PendingCalls;
use super::session::{ConnectionId, Session};
use super::socket_provider::SocketProvider;
use crate::cluster::{is_transient, RetryQueue};
use crate::config::ClientConfig;

/// Sync ids start above the one reserved for authentication.
const FIRST_SYNC: u64 = 1;

/// Events emitted during the connection lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A socket was connected and authenticated.
    Connected {
        /// The session identifier.
        id: ConnectionId,
        /// The server address.
        address: SocketAddr,
    },
    /// The current session failed.
    Disconnected {
        /// The session identifier.
        id: ConnectionId,
        /// The server address.
        address: SocketAddr,
        /// The failure cause.
        error: String,
    },
    /// The reconnector is about to ask for a socket.
    ReconnectAttempt {
        /// Attempt number since the last successful connection, starting at 1.
        attempt: u32,
    },
    /// A connect or handshake attempt failed.
    ReconnectFailed {
        /// The failed attempt number.
        attempt: u32,
        /// The failure cause.
        error: String,
    },
    /// The client was closed; no further events follow.
    Closed,
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has started yet.
    Disconnected,
    /// The reconnector is acquiring a socket or running the handshake.
    Connecting,
    /// A session is established.
    Alive,
    /// The session failed and reconnection is pending.
    Dead,
    /// The client was closed or gave up reconnecting.
    Closed,
}

/// Internal state. The `Dead` payload is the cause of the last failure;
/// `Alive` carries the session so the alive check yields it directly.
#[derive(Debug, Clone)]
enum Status {
    Disconnected,
    Connecting { last_error: Option<TarantoolError> },
    Alive(Arc<Session>),
    Dead(TarantoolError),
    Closed(TarantoolError),
}

impl Status {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Alive(_) => ConnectionState::Alive,
            Self::Dead(_) => ConnectionState::Dead,
            Self::Closed(_) => ConnectionState::Closed,
        }
    }
}

enum AttemptError {
    /// The attempt failed; try again.
    Retry(TarantoolError),
    /// The socket provider gave up.
    Fatal(TarantoolError),
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    status: watch::Sender<Status>,
    pending: PendingCalls,
    next_sync: AtomicU64,
    schema_id: Mutex<Option<u64>>,
    server_version: Mutex<Option<String>>,
    events: broadcast::Sender<ConnectionEvent>,
    retry: Option<Arc<RetryQueue>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns the connection to one server endpoint at a time.
///
/// A background reconnector task acquires sockets from a [`SocketProvider`],
/// runs the handshake, and starts a writer and a reader task per session.
/// When either task fails, the session is marked dead exactly once, every
/// pending call is failed (or queued for retry in cluster mode) and the
/// reconnector starts over.
///
/// Dropping the manager closes it.
#[derive(Debug)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Starts the reconnector and waits up to the configured init timeout
    /// for the first session.
    ///
    /// With `retry` enabled, transiently failed calls are queued and
    /// resubmitted after the next reconnect until their expiry passes.
    pub async fn start(
        config: ClientConfig,
        provider: Arc<dyn SocketProvider>,
        retry: bool,
    ) -> Result<Self> {
        let retry = retry.then(|| Arc::new(RetryQueue::new(config.cluster().operation_expiry())));
        let (status, _) = watch::channel(Status::Disconnected);
        let (events, _) = broadcast::channel(64);

        let inner = Arc::new(Inner {
            config,
            status,
            pending: PendingCalls::new(),
            next_sync: AtomicU64::new(FIRST_SYNC),
            schema_id: Mutex::new(None),
            server_version: Mutex::new(None),
            events,
            retry,
            background: Mutex::new(Vec::new()),
        });

        let mut background = vec![tokio::spawn(reconnect_loop(Arc::clone(&inner), provider))];
        if let Some(queue) = &inner.retry {
            let queue = Arc::clone(queue);
            background.push(tokio::spawn(async move { queue.sweep().await }));
        }
        inner.lock_background().extend(background);

        let manager = Self { inner };
        manager.wait_initial().await?;
        Ok(manager)
    }

    async fn wait_initial(&self) -> Result<()> {
        let init_timeout = self.inner.config.network().init_timeout();
        let mut rx = self.inner.status.subscribe();
        let outcome = tokio::time::timeout(init_timeout, async {
            rx.wait_for(|s| matches!(s, Status::Alive(_) | Status::Closed(_)))
                .await
                .map(|s| s.clone())
        })
        .await;

        match outcome {
            Ok(Ok(Status::Closed(err))) => Err(err),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TarantoolError::Closed("connection manager stopped".to_string())),
            Err(_) => {
                let cause = match &*self.inner.status.borrow() {
                    Status::Connecting {
                        last_error: Some(err),
                    } => format!(": {}", err),
                    _ => String::new(),
                };
                self.close();
                Err(TarantoolError::Timeout(format!(
                    "no connection within {:?}{}",
                    init_timeout, cause
                )))
            }
        }
    }

    /// Submits a request and returns its call handle.
    ///
    /// Waits only for write-buffer space or the writer lock, never for the
    /// response. Submission failures are reported through the handle.
    pub async fn exec(&self, request: Request) -> CallFuture {
        self.inner.exec(request).await
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state()
    }

    /// Returns true if a session is established.
    pub fn is_alive(&self) -> bool {
        self.state() == ConnectionState::Alive
    }

    /// Waits until a session is established.
    pub async fn wait_alive(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.status.subscribe();
        let outcome = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| matches!(s, Status::Alive(_) | Status::Closed(_)))
                .await
                .map(|s| s.clone())
        })
        .await;

        match outcome {
            Ok(Ok(Status::Closed(err))) => Err(err),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TarantoolError::Closed("connection manager stopped".to_string())),
            Err(_) => Err(TarantoolError::Timeout(format!(
                "connection not alive within {:?}",
                timeout
            ))),
        }
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the last schema id reported by the server.
    pub fn schema_id(&self) -> Option<u64> {
        *self.inner.schema_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the version line from the last server greeting.
    pub fn server_version(&self) -> Option<String> {
        self.inner
            .server_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns the number of calls waiting for a retry.
    pub fn queued_retry_count(&self) -> usize {
        self.inner.retry.as_ref().map_or(0, |q| q.len())
    }

    /// Closes the connection and stops reconnecting. Pending and queued
    /// calls fail with a closed error. Idempotent.
    pub fn close(&self) {
        self.inner
            .close_with(TarantoolError::Closed("client closed".to_string()));
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn lock_background(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        match &*self.status.borrow() {
            Status::Alive(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    fn closed_error(&self) -> Option<TarantoolError> {
        match &*self.status.borrow() {
            Status::Closed(err) => Some(err.clone()),
            _ => None,
        }
    }

    fn is_current(&self, session: &Session) -> bool {
        matches!(&*self.status.borrow(), Status::Alive(s) if s.id() == session.id())
    }

    fn update_schema_id(&self, schema_id: u64) {
        let mut current = self.schema_id.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != Some(schema_id) {
            tracing::debug!(schema_id, "schema id changed");
            *current = Some(schema_id);
        }
    }

    async fn exec(self: &Arc<Self>, request: Request) -> CallFuture {
        let sync = self.next_sync.fetch_add(1, Ordering::Relaxed);
        let deadline = self.retry.as_ref().map(|q| Instant::now() + q.expiry());
        let (call, future) = Call::new(sync, request, deadline);

        let status = self.status.borrow().clone();
        match status {
            Status::Alive(session) => self.submit(&session, call).await,
            Status::Closed(err) => call.complete(Err(err)),
            Status::Dead(err) => self.fail(call, err),
            Status::Disconnected | Status::Connecting { .. } => self.fail(
                call,
                TarantoolError::Communication("not connected".to_string()),
            ),
        }
        future
    }

    /// Frames `call`, registers it and hands the frame to the session.
    async fn submit(self: &Arc<Self>, session: &Arc<Session>, call: Call) {
        let sync = call.sync_id();
        let network = self.config.network();
        let frame = match encode_request(sync, None, call.request(), network.default_request_size())
        {
            Ok(frame) => frame,
            Err(err) => {
                call.complete(Err(err));
                return;
            }
        };

        if let Some(previous) = self.pending.register(call) {
            previous.complete(Err(TarantoolError::Protocol(format!(
                "sync id {} registered twice",
                sync
            ))));
        }

        // The session may have died or the client closed between the alive
        // check and the registration; the drain would then have missed this call.
        if !self.is_current(session) {
            if let Some(call) = self.pending.resolve(sync) {
                match self.closed_error() {
                    Some(err) => call.complete(Err(err)),
                    None => self.fail(
                        call,
                        TarantoolError::Communication("connection lost before send".to_string()),
                    ),
                }
            }
            return;
        }

        if let Err(err) = session.send(&frame, network.write_timeout()).await {
            if err.is_communication() {
                self.die(session.id(), err.clone());
            }
            if let Some(call) = self.pending.resolve(sync) {
                call.complete(Err(err));
            }
        }
    }

    /// Fails `call`, or queues it when cluster retry applies.
    fn fail(self: &Arc<Self>, call: Call, err: TarantoolError) {
        let Some(queue) = &self.retry else {
            call.complete(Err(err));
            return;
        };
        if !is_transient(&err) || call.is_expired(Instant::now()) {
            call.complete(Err(err));
            return;
        }

        let communication = err.is_communication();
        queue.push(call, err);

        // A reconnect may have completed before this call was queued.
        if communication && self.current_session().is_some() {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.flush_retries().await });
        }
    }

    /// Resubmits queued calls on the current session. Expired entries fail
    /// with the error that queued them.
    async fn flush_retries(self: &Arc<Self>) {
        let Some(queue) = &self.retry else {
            return;
        };
        let entries = queue.take_all();
        if entries.is_empty() {
            return;
        }

        tracing::debug!(count = entries.len(), "resubmitting queued calls");
        let now = Instant::now();
        for (call, error) in entries {
            if call.is_expired(now) {
                call.complete(Err(error));
                continue;
            }
            match self.current_session() {
                Some(session) => self.submit(&session, call).await,
                None => self.fail(call, error),
            }
        }
    }

    fn dispatch(self: &Arc<Self>, packet: Packet) {
        if let Some(schema_id) = packet.header.schema_id {
            self.update_schema_id(schema_id);
        }

        let sync = packet.header.sync;
        let Some(call) = self.pending.resolve(sync) else {
            tracing::warn!(sync, code = packet.header.code, "response for unknown sync id");
            return;
        };

        match packet.into_result() {
            Ok(data) => call.complete(Ok(data)),
            Err(err) => self.fail(call, err),
        }
    }

    /// Marks session `id` dead. Only the first report for the current
    /// session has an effect.
    fn die(self: &Arc<Self>, id: ConnectionId, cause: TarantoolError) {
        let cause = cause.into_communication();
        let mut dead = None;
        self.status.send_if_modified(|status| {
            if let Status::Alive(session) = status {
                if session.id() == id {
                    dead = Some(Arc::clone(session));
                }
            }
            if dead.is_none() {
                return false;
            }
            *status = Status::Dead(cause.clone());
            true
        });
        let Some(session) = dead else {
            return;
        };

        session.shutdown(cause.clone());
        let calls = self.pending.drain();
        tracing::warn!(
            conn = %id,
            address = %session.address(),
            pending = calls.len(),
            error = %cause,
            "connection died"
        );
        for call in calls {
            self.fail(call, cause.clone());
        }

        let _ = self.events.send(ConnectionEvent::Disconnected {
            id,
            address: session.address(),
            error: cause.to_string(),
        });
    }

    fn close_with(&self, err: TarantoolError) {
        let mut previous = None;
        let closed = self.status.send_if_modified(|status| {
            if matches!(status, Status::Closed(_)) {
                return false;
            }
            previous = Some(std::mem::replace(status, Status::Closed(err.clone())));
            true
        });
        if !closed {
            return;
        }

        if let Some(Status::Alive(session)) = previous {
            session.shutdown(err.clone());
        }
        for handle in self.lock_background().drain(..) {
            handle.abort();
        }
        for call in self.pending.drain() {
            call.complete(Err(err.clone()));
        }
        if let Some(queue) = &self.retry {
            queue.close(err.clone());
        }

        tracing::info!(reason = %err, "client closed");
        let _ = self.events.send(ConnectionEvent::Closed);
    }

    /// Moves `Disconnected`/`Dead` to `Connecting`. Returns false if closed.
    fn mark_connecting(&self, last_error: Option<TarantoolError>) -> bool {
        self.status.send_if_modified(|status| match status {
            Status::Disconnected | Status::Dead(_) => {
                *status = Status::Connecting { last_error };
                true
            }
            _ => false,
        })
    }

    fn record_attempt_error(&self, err: &TarantoolError) {
        self.status.send_if_modified(|status| match status {
            Status::Connecting { last_error } => {
                *last_error = Some(err.clone());
                true
            }
            _ => false,
        });
    }

    async fn connect_once(
        self: &Arc<Self>,
        provider: &dyn SocketProvider,
        retry_number: u32,
        last_error: Option<&TarantoolError>,
    ) -> std::result::Result<bool, AttemptError> {
        let mut stream = provider
            .get(retry_number, last_error)
            .await
            .map_err(|e| {
                if e.is_communication() {
                    AttemptError::Retry(e)
                } else {
                    AttemptError::Fatal(e)
                }
            })?;
        let address = stream
            .peer_addr()
            .map_err(|e| AttemptError::Retry(e.into()))?;

        let network = self.config.network();
        let handshake = tokio::time::timeout(
            network.connect_timeout(),
            handshake::perform(&mut stream, self.config.security(), network.max_frame_size()),
        )
        .await
        .map_err(|_| {
            AttemptError::Retry(TarantoolError::Communication(format!(
                "handshake with {} timed out",
                address
            )))
        })?
        .map_err(AttemptError::Retry)?;

        Ok(self.establish(stream, address, handshake))
    }

    /// Publishes a new session and starts its I/O tasks. Returns false if
    /// the client was closed meanwhile.
    fn establish(self: &Arc<Self>, stream: TcpStream, address: SocketAddr, handshake: Handshake) -> bool {
        let (read_half, write_half) = stream.into_split();
        let session = Arc::new(Session::new(address, write_half, self.config.network()));
        let id = session.id();

        *self.server_version.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(handshake.greeting.version().to_string());
        if let Some(schema_id) = handshake.schema_id {
            self.update_schema_id(schema_id);
        }

        let published = self.status.send_if_modified(|status| {
            if !matches!(status, Status::Connecting { .. }) {
                return false;
            }
            *status = Status::Alive(Arc::clone(&session));
            true
        });
        if !published {
            session.shutdown(TarantoolError::Closed("client closed".to_string()));
            return false;
        }

        let writer = {
            let inner = Arc::clone(self);
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                tracing::debug!(conn = %session.id(), "writer started");
                if let Err(err) = session.write_loop().await {
                    inner.die(session.id(), err);
                }
            })
        };
        let reader = tokio::spawn(read_loop(Arc::clone(self), Arc::clone(&session), read_half));
        session.attach(vec![writer, reader]);

        tracing::info!(
            conn = %id,
            address = %address,
            version = handshake.greeting.version(),
            "connected"
        );
        let _ = self.events.send(ConnectionEvent::Connected { id, address });
        true
    }
}

/// Reads frames until the socket fails and routes each response to its call.
async fn read_loop(inner: Arc<Inner>, session: Arc<Session>, read_half: OwnedReadHalf) {
    tracing::debug!(conn = %session.id(), "reader started");
    let codec = PacketCodec::with_max_frame_size(inner.config.network().max_frame_size());
    let mut frames = FramedRead::new(read_half, codec);

    let err = loop {
        match frames.next().await {
            Some(Ok(packet)) => inner.dispatch(packet),
            Some(Err(err)) => break err,
            None => {
                break TarantoolError::Communication(format!(
                    "connection to {} closed by server",
                    session.address()
                ))
            }
        }
    };
    inner.die(session.id(), err);
}

/// Waits for the connection to need a session, then acquires one. Exits
/// when the client is closed.
async fn reconnect_loop(inner: Arc<Inner>, provider: Arc<dyn SocketProvider>) {
    let mut status = inner.status.subscribe();

    loop {
        let current = status
            .wait_for(|s| !matches!(s, Status::Alive(_) | Status::Connecting { .. }))
            .await
            .map(|s| s.clone());
        let mut last_error = match current {
            Ok(Status::Dead(err)) => Some(err),
            Ok(Status::Disconnected) => None,
            _ => return,
        };
        if !inner.mark_connecting(last_error.clone()) {
            return;
        }

        let mut retry_number = 0u32;
        loop {
            let attempt = retry_number + 1;
            let _ = inner.events.send(ConnectionEvent::ReconnectAttempt { attempt });
            tracing::debug!(attempt, "attempting connection");

            match inner
                .connect_once(provider.as_ref(), retry_number, last_error.as_ref())
                .await
            {
                Ok(true) => break,
                Ok(false) => return,
                Err(AttemptError::Fatal(err)) => {
                    tracing::error!(attempt, error = %err, "reconnection aborted");
                    let _ = inner.events.send(ConnectionEvent::ReconnectFailed {
                        attempt,
                        error: err.to_string(),
                    });
                    inner.close_with(err);
                    return;
                }
                Err(AttemptError::Retry(err)) => {
                    tracing::warn!(attempt, error = %err, "connection attempt failed");
                    let _ = inner.events.send(ConnectionEvent::ReconnectFailed {
                        attempt,
                        error: err.to_string(),
                    });
                    inner.record_attempt_error(&err);
                    last_error = Some(err);
                    retry_number = retry_number.saturating_add(1);
                }
            }
        }

        inner.flush_retries().await;
    }
}
