//! Server Engine
//!
//! This module ties the lifecycle engine together: the acceptor pool that
//! keeps listeners armed, the per-connection dispatch tasks, and the shutdown
//! coordinator that drains the registry deterministically.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Acceptor worker completes accept()
//!        │
//!        ▼
//! 2. Under the registry lock: still running?
//!        │ no  -> close silently, no callback ever fires
//!        │ yes -> register, worker loops back (pool stays full)
//!        ▼
//! 3. Dispatch task spawned
//!        │
//!        ▼
//! 4. ┌──────────────────────────────┐
//!    │ on_connect -> State          │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ recv whole message      │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ on_message(&mut State)  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │   (reads never overlap, so
//!    └──────────────────────────────┘    per-connection order holds)
//!        │
//!        ▼ EOF / error / forced close
//! 5. on_disconnect(State) -> close -> stop writer -> deregister LAST
//! ```
//!
//! Responses take a separate path: `ConnectionHandle::send` queues the
//! message and a companion writer task drains the queue, so handlers never
//! block on socket writes. A failed write force-closes the channel and
//! cleanup flows through step 5 like any other failure.
//!
//! ## Shutdown
//!
//! `stop()` flips `running` and force-closes every registered channel under
//! the one registry lock, then waits for the registry to drain. Every
//! connection's dispatcher observes its read failing, runs step 5, and the
//! last removal wakes the waiter. After `stop()` returns, no callback for
//! this server will ever fire again.

use crate::channel::{bind_endpoint, channel_views, ChannelControl, EndpointError, MessageReader, MessageWriter};
use crate::handler::IpcHandler;
use crate::server::reaper::Reaper;
use crate::server::registry::{ConnectionId, ConnectionIds, Registry};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Default inbound/outbound message size limit (4 KB).
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default number of concurrently armed acceptors.
pub const DEFAULT_LISTENER_POOL: usize = 4;

/// Default interval between dead-peer sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Server configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Channel name (process-wide unique)
    pub name: String,

    /// Largest inbound message accepted, in bytes
    pub inbound_buffer: usize,

    /// Largest outbound message accepted, in bytes
    pub outbound_buffer: usize,

    /// Number of accepts kept pending at all times
    pub listener_pool: usize,

    /// Interval between dead-peer sweeps
    pub reap_interval: Duration,
}

impl ServerConfig {
    /// Configuration for `name` with default sizes and pool.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inbound_buffer: DEFAULT_BUFFER_SIZE,
            outbound_buffer: DEFAULT_BUFFER_SIZE,
            listener_pool: DEFAULT_LISTENER_POOL,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.name.is_empty() {
            return Err(ServerError::InvalidConfig("channel name is empty".into()));
        }
        if self.listener_pool == 0 {
            return Err(ServerError::InvalidConfig("listener pool must be > 0".into()));
        }
        if self.inbound_buffer == 0 || self.outbound_buffer == 0 {
            return Err(ServerError::InvalidConfig("buffer sizes must be > 0".into()));
        }
        Ok(())
    }
}

/// Errors that can occur while constructing a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration value makes no sense
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bind failure: name collision, permissions, filesystem
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Errors returned by [`ConnectionHandle::send`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The payload exceeds the configured outbound limit
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The connection is already down
    #[error("connection closed")]
    Closed,
}

/// Statistics for the lifecycle engine.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total messages dispatched to the handler
    pub messages_dispatched: AtomicU64,
    /// Total payload bytes read
    pub bytes_read: AtomicU64,
    /// Total payload bytes written
    pub bytes_written: AtomicU64,
    /// Connections force-closed by the reaper
    pub connections_reaped: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn connections_reaped(&self, count: usize) {
        self.connections_reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn reaped(&self) -> u64 {
        self.connections_reaped.load(Ordering::Relaxed)
    }
}

/// A handler's view of one live connection.
///
/// Cheap to clone; valid only until `on_disconnect` fires for this handle.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Bytes>,
    control: ChannelControl,
    outbound_limit: usize,
}

impl ConnectionHandle {
    /// The registry key for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues one message for the client. Fire-and-forget: returns as soon as
    /// the message is enqueued; a failed socket write later tears the
    /// connection down through the disconnect path.
    pub fn send(&self, message: Bytes) -> Result<(), SendError> {
        if message.len() > self.outbound_limit {
            return Err(SendError::MessageTooLarge {
                size: message.len(),
                max: self.outbound_limit,
            });
        }
        self.outbound.send(message).map_err(|_| SendError::Closed)
    }

    /// Forces this connection closed; the disconnect callback follows.
    pub fn close(&self) {
        self.control.force_close();
    }
}

/// The IPC server: acceptor pool, registry, reaper, shutdown coordinator.
///
/// Single-use: construct with [`IpcServer::start`], tear down with
/// [`IpcServer::stop`].
pub struct IpcServer {
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Reaper,
    socket: PathBuf,
    stopped: AtomicBool,
}

impl IpcServer {
    /// Binds the named endpoint and starts the engine.
    ///
    /// Fails fast if the name is already bound by a live process or the
    /// socket cannot be created. Must be called from within a Tokio runtime.
    pub fn start<H: IpcHandler>(config: ServerConfig, handler: H) -> Result<IpcServer, ServerError> {
        config.validate()?;

        let (listener, socket) = bind_endpoint(&config.name)?;
        let listener = Arc::new(listener);
        let registry = Arc::new(Registry::new());
        let stats = Arc::new(ServerStats::new());
        let handler = Arc::new(handler);
        let ids = Arc::new(ConnectionIds::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reaper = Reaper::start(
            Arc::clone(&registry),
            config.reap_interval,
            Arc::clone(&stats),
        );

        for worker in 0..config.listener_pool {
            tokio::spawn(acceptor_loop(
                worker,
                Arc::clone(&listener),
                Arc::clone(&registry),
                Arc::clone(&handler),
                Arc::clone(&ids),
                Arc::clone(&stats),
                config.inbound_buffer,
                config.outbound_buffer,
                shutdown_rx.clone(),
            ));
        }

        info!(
            name = %config.name,
            socket = %socket.display(),
            pool = config.listener_pool,
            "Server started"
        );

        Ok(IpcServer {
            registry,
            stats,
            shutdown_tx,
            reaper,
            socket,
            stopped: AtomicBool::new(false),
        })
    }

    /// Stops the server: no new connections, every live connection is
    /// force-closed, and this call returns only once the registry is empty.
    ///
    /// After `stop()` returns, no callback for this server fires again.
    /// Safe to call more than once; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Retire the acceptors and the reaper, then force-close everything
        // under the registry lock.
        let _ = self.shutdown_tx.send(true);
        self.reaper.stop();
        let closing = self.registry.begin_shutdown();
        info!(closing = closing, "Server stopping; draining registry");

        self.registry.drained().await;
        let _ = std::fs::remove_file(&self.socket);
        info!("Server stopped");
    }

    /// Number of currently live connections.
    pub fn live_connections(&self) -> usize {
        self.registry.len()
    }

    /// Engine statistics.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// The socket path this server is bound to.
    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

/// One armed listener: accepts, registers, spawns the dispatcher, re-arms.
///
/// The pool never shrinks while running because the worker loops straight
/// back to `accept()` after handing the connection off. An accept error while
/// running retires this worker (acceptable degradation with pool > 1); after
/// shutdown it exits silently.
#[allow(clippy::too_many_arguments)]
async fn acceptor_loop<H: IpcHandler>(
    worker: usize,
    listener: Arc<UnixListener>,
    registry: Arc<Registry>,
    handler: Arc<H>,
    ids: Arc<ConnectionIds>,
    stats: Arc<ServerStats>,
    inbound_buffer: usize,
    outbound_buffer: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown_rx.changed() => return,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, _addr)) => {
                if !admit_connection(
                    stream,
                    &registry,
                    &handler,
                    &ids,
                    &stats,
                    inbound_buffer,
                    outbound_buffer,
                    worker,
                ) {
                    // Lost the race with stop(): the connection was closed
                    // without any callback, and there is nothing left to arm.
                    return;
                }
            }
            Err(e) => {
                if *shutdown_rx.borrow() {
                    return;
                }
                warn!(worker = worker, error = %e, "Accept failed; listener retiring");
                return;
            }
        }
    }
}

/// Registers an accepted stream and spawns its dispatch task.
///
/// Returns false iff shutdown had already begun, in which case the stream is
/// closed on the spot and no callback fires.
#[allow(clippy::too_many_arguments)]
fn admit_connection<H: IpcHandler>(
    stream: UnixStream,
    registry: &Arc<Registry>,
    handler: &Arc<H>,
    ids: &Arc<ConnectionIds>,
    stats: &Arc<ServerStats>,
    inbound_buffer: usize,
    outbound_buffer: usize,
    worker: usize,
) -> bool {
    let id = ids.next();
    let (reader, writer, control) = channel_views(stream, inbound_buffer, outbound_buffer);

    if !registry.try_register(id, control.clone()) {
        control.force_close();
        return false;
    }

    stats.connection_opened();
    debug!(conn = id, worker = worker, "Connection accepted");

    tokio::spawn(dispatch_connection(
        id,
        reader,
        writer,
        control,
        Arc::clone(registry),
        Arc::clone(handler),
        Arc::clone(stats),
        outbound_buffer,
    ));
    true
}

/// Per-connection teardown, run on drop.
///
/// The registry entry must be released even when a handler callback panics
/// and unwinds the dispatch task; until it is, `stop()` cannot return. Drop
/// order inside: forced close, writer stopped, stats, registry removal last.
struct ConnectionCleanup {
    id: ConnectionId,
    control: ChannelControl,
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
    writer_task: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for ConnectionCleanup {
    fn drop(&mut self) {
        self.control.force_close();
        if let Some(writer) = self.writer_task.take() {
            writer.abort();
        }
        self.stats.connection_closed();
        // The registry count only drops once cleanup is complete, which is
        // what stop() relies on.
        self.registry.remove(self.id);
    }
}

/// Drives one connection from `on_connect` to deregistration.
///
/// Reads are strictly sequential, so `on_message` calls for this connection
/// arrive in send order. Cleanup order is fixed: disconnect callback, then
/// the [`ConnectionCleanup`] guard (forced close, writer stopped, registry
/// removal last). The guard also fires if a callback unwinds, so a panicking
/// handler loses its connection but never leaks a registry entry.
#[allow(clippy::too_many_arguments)]
async fn dispatch_connection<H: IpcHandler>(
    id: ConnectionId,
    mut reader: MessageReader,
    writer: MessageWriter,
    control: ChannelControl,
    registry: Arc<Registry>,
    handler: Arc<H>,
    stats: Arc<ServerStats>,
    outbound_limit: usize,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle {
        id,
        outbound: outbound_tx,
        control: control.clone(),
        outbound_limit,
    };

    let writer_task = tokio::spawn(write_loop(
        id,
        writer,
        outbound_rx,
        control.clone(),
        Arc::clone(&stats),
    ));

    let cleanup = ConnectionCleanup {
        id,
        control,
        registry,
        stats: Arc::clone(&stats),
        writer_task: Some(writer_task),
    };

    info!(conn = id, "Client connected");
    let mut state = handler.on_connect(&handle);

    let result = read_loop(&mut reader, &handle, &*handler, &mut state, &stats).await;

    match &result {
        Ok(()) => debug!(conn = id, "Client disconnected"),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            warn!(conn = id, error = %e, "Framing violation; disconnecting")
        }
        Err(e) => debug!(conn = id, error = %e, "Connection ended with error"),
    }

    // Disconnect callback first, removal last.
    handler.on_disconnect(&handle, state);
    drop(cleanup);
}

/// The sequential message loop for one connection.
async fn read_loop<H: IpcHandler>(
    reader: &mut MessageReader,
    handle: &ConnectionHandle,
    handler: &H,
    state: &mut H::State,
    stats: &ServerStats,
) -> io::Result<()> {
    // The next read is only armed after on_message returns, so message
    // order per connection is preserved.
    loop {
        match reader.recv().await? {
            Some(message) => {
                stats.bytes_read(message.len());
                handler.on_message(handle, &message, state);
                stats.message_dispatched();
            }
            None => return Ok(()),
        }
    }
}

/// Drains the outbound queue for one connection.
///
/// A write failure force-closes the channel so the reader observes it and
/// the connection tears down through the single disconnect path.
async fn write_loop(
    id: ConnectionId,
    writer: MessageWriter,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    control: ChannelControl,
    stats: Arc<ServerStats>,
) {
    while let Some(message) = outbound_rx.recv().await {
        match writer.send(&message).await {
            Ok(()) => stats.bytes_written(message.len()),
            Err(e) => {
                debug!(conn = id, error = %e, "Write failed; forcing close");
                control.force_close();
                return;
            }
        }
    }
}
