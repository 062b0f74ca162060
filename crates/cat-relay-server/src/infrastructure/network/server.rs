//! Multi-client TCP relay server.
//!
//! # Task layout
//!
//! ```text
//!                 ┌──────────────┐
//! TcpListener ──► │ accept task  │ ── register ──► SlotRegistry (parking_lot::Mutex)
//!                 └──────────────┘                     │
//!                        │ per connection               │ send / broadcast
//!                        ▼                              ▼
//!                 receive task                    writer task
//!          (1024-byte buffer, decode,       (unbounded queue, write_all
//!           emit ServerEvent::Message)        in call order)
//! ```
//!
//! Nothing a caller invokes awaits socket I/O: [`RelayServer::send`] queues an
//! encoded buffer on the connection's writer task and returns.  Events reach
//! the consumer through the bounded receiver returned by
//! [`RelayServer::start`].
//!
//! # Teardown
//!
//! Exactly one party removes a connection from the registry: its receive
//! task (peer closed, reset, or read fault), its writer task (write fault)
//! or [`RelayServer::close`].  Whoever removes it emits the single
//! `ClientDisconnected` event, so the client count drops exactly once per
//! connection.

use std::io;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cat_relay_core::{
    decode_ascii, encode_ascii, ConnectionId, ConnectionState, DisconnectReason, IdentityPolicy,
    SendError, ServerEvent, ServerSection, SlotRegistry, DEFAULT_PORT, RECEIVE_BUFFER_SIZE,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpSocket, TcpStream,
    },
    sync::mpsc::{self, error::TrySendError},
    task::AbortHandle,
};
use tracing::{debug, error, info, trace, warn};

use crate::application::dispatch_commands::ReplySink;

/// Pause after a failed `accept` so a persistent error cannot spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors raised while starting the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured bind address is not an IP address.
    #[error("invalid bind address '{value}': {source}")]
    InvalidBindAddress {
        value: String,
        #[source]
        source: AddrParseError,
    },

    /// Creating, binding or listening on the socket failed.  Never retried.
    #[error("failed to bind relay listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Runtime settings of a [`RelayServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address and port of the listener.  Port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Listen backlog passed to the OS.
    pub backlog: u32,
    pub identity_policy: IdentityPolicy,
    /// Capacity of the event channel; a full channel pauses reads.
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            backlog: 5,
            identity_policy: IdentityPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Builds the runtime settings from the `[server]` section of the config file.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidBindAddress`] if `bind_address` is not
    /// an IPv4 or IPv6 address.
    pub fn from_section(section: &ServerSection) -> Result<Self, ServerError> {
        let ip: IpAddr =
            section
                .bind_address
                .parse()
                .map_err(|source| ServerError::InvalidBindAddress {
                    value: section.bind_address.clone(),
                    source,
                })?;

        Ok(Self {
            bind_addr: SocketAddr::new(ip, section.port),
            backlog: section.backlog,
            identity_policy: section.identity_policy,
            event_capacity: section.event_capacity,
        })
    }
}

/// Registry entry of one accepted connection.
struct ConnectionHandle {
    peer: SocketAddr,
    /// Queue drained by the connection's writer task.
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Receive task; aborted when the connection is torn down from outside it.
    reader: AbortHandle,
    state: ConnectionState,
}

/// State shared by the server handle and all of its tasks.
struct Shared {
    registry: Mutex<SlotRegistry<ConnectionHandle>>,
    closed: AtomicBool,
    events: mpsc::Sender<ServerEvent>,
}

impl Shared {
    async fn emit(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            trace!("event receiver dropped; event discarded");
        }
    }

    /// Non-awaiting variant used from synchronous callers such as `close`.
    fn try_emit(&self, event: ServerEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                warn!("event channel full; dropping {event:?}");
            }
        }
    }

    /// Removes `identity` from the registry and emits its
    /// `ClientDisconnected`.  Returns `None` if another party already tore
    /// the connection down.
    ///
    /// The event is queued while the registry lock is held, so under
    /// [`IdentityPolicy::RestartWhenEmpty`] it always precedes the
    /// `ClientConnected` of a peer that reuses the identity.
    async fn detach(
        &self,
        identity: ConnectionId,
        reason: &DisconnectReason,
    ) -> Option<ConnectionHandle> {
        let permit = self.events.reserve().await.ok();

        let mut registry = self.registry.lock();
        let handle = registry.remove(identity)?;
        match permit {
            Some(permit) => permit.send(ServerEvent::ClientDisconnected {
                identity,
                reason: reason.clone(),
            }),
            None => trace!("event receiver dropped; event discarded"),
        }
        Some(handle)
    }
}

/// Logs the final state of a detached connection and drops it.
///
/// Dropping the handle drops the last outbound sender, which lets the
/// writer task flush what is queued and shut the socket down.
fn retire(identity: ConnectionId, handle: ConnectionHandle, reason: &DisconnectReason) {
    match handle.state.transition(reason.terminal_state()) {
        Ok(state) => debug!("{identity}: {:?} -> {state:?}", handle.state),
        Err(e) => warn!("{identity}: {e}"),
    }

    if reason.is_orderly() {
        info!("{identity} ({}) disconnected: {reason}", handle.peer);
    } else {
        warn!("{identity} ({}) closed after {reason}", handle.peer);
    }
}

/// Asynchronous multi-client TCP relay.
///
/// Created with [`RelayServer::start`]; dropping the server closes it.
pub struct RelayServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept_task: AbortHandle,
}

impl RelayServer {
    /// Binds the listener, spawns the accept loop and returns immediately.
    ///
    /// The returned receiver yields every [`ServerEvent`] of every
    /// connection.  Dropping it is allowed; events are then discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the socket cannot be bound or
    /// put into the listening state.
    pub async fn start(
        config: ServerConfig,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ServerError> {
        let listener =
            bind_listener(config.bind_addr, config.backlog).map_err(|source| {
                ServerError::BindFailed {
                    addr: config.bind_addr,
                    source,
                }
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::BindFailed {
            addr: config.bind_addr,
            source,
        })?;

        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            registry: Mutex::new(SlotRegistry::new(config.identity_policy)),
            closed: AtomicBool::new(false),
            events: events_tx,
        });

        let accept_task = tokio::spawn(accept_loop(Arc::clone(&shared), listener)).abort_handle();

        info!(
            "relay server listening on {local_addr} (backlog {}, identities {:?})",
            config.backlog, config.identity_policy
        );

        Ok((
            Self {
                shared,
                local_addr,
                accept_task,
            },
            events_rx,
        ))
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connections.
    pub fn client_count(&self) -> usize {
        self.shared.registry.lock().live_count()
    }

    /// Point-in-time list of live connections in identity order.
    pub fn connected_clients(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.shared
            .registry
            .lock()
            .iter()
            .map(|(identity, handle)| (identity, handle.peer))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Queues `text` for the connection with `identity`.
    ///
    /// The text is encoded into a fresh buffer and handed to the
    /// connection's writer task; the call never waits for the write.  Sends
    /// to one connection are written in call order.  A write that later fails
    /// is logged and tears the connection down.
    ///
    /// # Errors
    ///
    /// - [`SendError::ServerClosed`] after [`close`](Self::close).
    /// - [`SendError::UnknownIdentity`] if no live connection has `identity`.
    /// - [`SendError::ConnectionClosed`] if the writer task has already stopped.
    pub fn send(&self, text: &str, identity: ConnectionId) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::ServerClosed);
        }

        let bytes = encode_ascii(text);
        let queued = bytes.len();
        let registry = self.shared.registry.lock();
        let handle = registry
            .get(identity)
            .ok_or(SendError::UnknownIdentity(identity))?;
        handle
            .outbound
            .send(bytes)
            .map_err(|_| SendError::ConnectionClosed(identity))?;
        trace!("{identity}: queued {queued} byte(s)");
        Ok(())
    }

    /// Queues `text` for every live connection and returns how many sends
    /// were queued.
    ///
    /// Targets come from a snapshot taken under the registry lock, so
    /// connections accepted or torn down meanwhile do not disturb the loop.
    pub fn broadcast(&self, text: &str) -> usize {
        if self.is_closed() {
            return 0;
        }

        let bytes = encode_ascii(text);
        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<Vec<u8>>)> = self
            .shared
            .registry
            .lock()
            .iter()
            .map(|(identity, handle)| (identity, handle.outbound.clone()))
            .collect();

        let mut queued = 0;
        for (identity, outbound) in targets {
            match outbound.send(bytes.clone()) {
                Ok(()) => queued += 1,
                Err(_) => debug!("{identity}: broadcast skipped, connection closing"),
            }
        }
        queued
    }

    /// Stops accepting, closes every live connection and empties the registry.
    ///
    /// Each closed connection emits `ClientDisconnected` with
    /// [`DisconnectReason::LocalClose`].  Calling `close` again is a no-op.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the accept future drops the listener.
        self.accept_task.abort();

        let drained = self.shared.registry.lock().drain();
        let count = drained.len();
        for (identity, handle) in drained {
            handle.reader.abort();
            retire(identity, handle, &DisconnectReason::LocalClose);
            self.shared.try_emit(ServerEvent::ClientDisconnected {
                identity,
                reason: DisconnectReason::LocalClose,
            });
        }

        info!(
            "relay server on {} closed ({count} connection(s) dropped)",
            self.local_addr
        );
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.close();
    }
}

impl ReplySink for RelayServer {
    fn reply(&self, identity: ConnectionId, text: &str) -> Result<(), SendError> {
        self.send(text, identity)
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(addr)?;
    socket.listen(backlog)
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => admit(&shared, stream, peer),
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Registers an accepted stream and spawns its receive and writer tasks.
fn admit(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not disable Nagle for {peer}: {e}");
    }
    let (read_half, write_half) = stream.into_split();

    // Registration and task start-up happen under one lock so no other
    // party can observe the identity before it is registered.
    let mut registry = shared.registry.lock();
    if shared.closed.load(Ordering::SeqCst) {
        debug!("server closed; dropping connection from {peer}");
        return;
    }
    let Some(identity) = registry.next_identity() else {
        error!("connection identities exhausted; refusing {peer}");
        return;
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(receive_loop(
        Arc::clone(shared),
        identity,
        peer,
        read_half,
    ))
    .abort_handle();
    tokio::spawn(write_loop(
        Arc::clone(shared),
        identity,
        write_half,
        outbound_rx,
    ));

    let handle = ConnectionHandle {
        peer,
        outbound: outbound_tx,
        reader: reader.clone(),
        state: ConnectionState::Connected,
    };
    match registry.register(handle) {
        Ok(registered) => info!("accepted {peer} as {registered}"),
        Err(e) => {
            reader.abort();
            error!("refusing {peer}: {e}");
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    identity: ConnectionId,
    peer: SocketAddr,
    mut reader: OwnedReadHalf,
) {
    shared
        .emit(ServerEvent::ClientConnected { identity, peer })
        .await;

    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
    let reason = loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break DisconnectReason::PeerClosed,
            Ok(n) => {
                let text = decode_ascii(&buffer[..n]);
                debug!("{identity}: received {n} byte(s)");
                shared.emit(ServerEvent::Message { text, identity }).await;
            }
            Err(e) => break DisconnectReason::from_io_error(&e),
        }
    };

    if let Some(handle) = shared.detach(identity, &reason).await {
        retire(identity, handle, &reason);
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    identity: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!("{identity}: send failed: {e}");
            let reason = DisconnectReason::from_io_error(&e);
            if let Some(handle) = shared.detach(identity, &reason).await {
                handle.reader.abort();
                retire(identity, handle, &reason);
            }
            return;
        }
    }

    // All senders dropped: the connection was detached.
    if let Err(e) = writer.shutdown().await {
        trace!("{identity}: shutdown after teardown failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
