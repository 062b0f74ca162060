//! Network infrastructure for the relay client.
//!
//! Handles the single TCP connection to a relay server and forwards what the
//! server sends as [`ClientEvent`]s on an `mpsc` channel.
//!
//! Architecture:
//! - `RelayClient` makes exactly one connect attempt.  There is no reconnect
//!   loop; a dropped connection needs a new client.
//! - A receive task decodes every read into a `ClientEvent::Message`.
//! - A writer task drains the outbound queue, so [`RelayClient::send`] never
//!   waits for the socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cat_relay_core::{
    decode_ascii, encode_ascii, ClientEvent, ConnectionProfile, ConnectionState, DEFAULT_PORT,
    RECEIVE_BUFFER_SIZE,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        lookup_host,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::AbortHandle,
    time,
};
use tracing::{debug, info, trace, warn};

/// Errors returned by [`RelayClient::connect`].
#[derive(Debug, Error)]
pub enum ClientNetworkError {
    /// The host name could not be resolved to any address.
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },
    /// The TCP connection to the server failed.
    #[error("failed to connect to relay at {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: io::Error,
    },
    /// The connect attempt did not finish within the configured bound.
    #[error("connecting to relay at {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },
    /// `connect` was already called on this client.
    #[error("this client already made its connect attempt; create a new client")]
    AlreadyAttempted,
    /// `clean_up` was called while the connect attempt was in flight.
    #[error("client was cleaned up while connecting")]
    Cancelled,
}

/// Errors returned by [`RelayClient::send`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientSendError {
    #[error("client is not connected")]
    NotConnected,
    #[error("connection is closing")]
    ConnectionClosed,
}

/// Configuration for the client's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host name or IP address of the relay server.
    pub host: String,
    pub port: u16,
    /// Upper bound for resolving and connecting; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: None,
            event_capacity: 256,
        }
    }
}

impl From<&ConnectionProfile> for ClientConfig {
    fn from(profile: &ConnectionProfile) -> Self {
        Self {
            host: profile.host.clone(),
            port: profile.port,
            connect_timeout: profile.connect_timeout_secs.map(Duration::from_secs),
            ..Self::default()
        }
    }
}

impl ClientConfig {
    /// `host:port`, as passed to the resolver.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mutable connection state shared with the I/O tasks.
struct Link {
    state: ConnectionState,
    attempted: bool,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    reader: Option<AbortHandle>,
}

impl Link {
    /// Moves a live link into `next` and releases its transport handles.
    ///
    /// Returns `false` if the link was already terminal, in which case the
    /// caller lost the race against another teardown.
    fn finish(&mut self, next: ConnectionState) -> bool {
        match self.state.transition(next) {
            Ok(state) => {
                self.state = state;
                self.outbound = None;
                self.reader = None;
                true
            }
            Err(e) => {
                trace!("{e}");
                false
            }
        }
    }
}

/// Client end of one relay connection.
pub struct RelayClient {
    config: ClientConfig,
    link: Arc<Mutex<Link>>,
    events: mpsc::Sender<ClientEvent>,
}

impl RelayClient {
    /// Creates a client in the `Connecting` state.  Nothing is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let client = Self {
            config,
            link: Arc::new(Mutex::new(Link {
                state: ConnectionState::Connecting,
                attempted: false,
                outbound: None,
                reader: None,
            })),
            events: events_tx,
        };
        (client, events_rx)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    /// `true` while the connection is established.  Reflects the last known
    /// state only; the socket is not polled.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Makes the single connect attempt and arms the receive loop.
    ///
    /// # Errors
    ///
    /// - [`ClientNetworkError::AlreadyAttempted`] on every call but the first.
    /// - [`ClientNetworkError::Resolve`], [`ClientNetworkError::ConnectFailed`]
    ///   or [`ClientNetworkError::ConnectTimeout`] when the attempt fails;
    ///   the client is then `Faulted`.
    /// - [`ClientNetworkError::Cancelled`] if [`clean_up`](Self::clean_up)
    ///   ran during the attempt.
    pub async fn connect(&self) -> Result<(), ClientNetworkError> {
        {
            let mut link = self.link.lock();
            if link.attempted {
                return Err(ClientNetworkError::AlreadyAttempted);
            }
            link.attempted = true;
        }

        let target = self.config.target();
        let attempt = open(target.clone());
        let result = match self.config.connect_timeout {
            Some(limit) => time::timeout(limit, attempt).await.unwrap_or_else(|_| {
                Err(ClientNetworkError::ConnectTimeout {
                    target: target.clone(),
                    timeout: limit,
                })
            }),
            None => attempt.await,
        };

        match result {
            Ok(stream) => self.arm(stream),
            Err(e) => {
                self.link.lock().finish(ConnectionState::Faulted);
                warn!("{e}");
                Err(e)
            }
        }
    }

    /// Spawns the I/O tasks for a freshly connected stream.
    fn arm(&self, stream: TcpStream) -> Result<(), ClientNetworkError> {
        let server = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle: {e}");
        }
        let (read_half, write_half) = stream.into_split();

        let mut link = self.link.lock();
        if link.state != ConnectionState::Connecting {
            return Err(ClientNetworkError::Cancelled);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(receive_loop(
            Arc::clone(&self.link),
            self.events.clone(),
            read_half,
        ))
        .abort_handle();
        tokio::spawn(write_loop(
            Arc::clone(&self.link),
            self.events.clone(),
            write_half,
            outbound_rx,
        ));

        link.state = ConnectionState::Connected;
        link.outbound = Some(outbound_tx);
        link.reader = Some(reader);
        log_connected(&self.config.target(), server);
        Ok(())
    }

    /// Queues `text` for the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientSendError::NotConnected`] unless the client is
    /// `Connected`, and [`ClientSendError::ConnectionClosed`] if the writer
    /// task has already stopped.
    pub fn send(&self, text: &str) -> Result<(), ClientSendError> {
        let bytes = encode_ascii(text);
        let link = self.link.lock();
        if link.state != ConnectionState::Connected {
            return Err(ClientSendError::NotConnected);
        }
        let outbound = link
            .outbound
            .as_ref()
            .ok_or(ClientSendError::ConnectionClosed)?;
        outbound
            .send(bytes)
            .map_err(|_| ClientSendError::ConnectionClosed)
    }

    /// Closes the connection if it is open.  Safe to call repeatedly.
    ///
    /// Queued sends are still flushed before the socket is shut down.  A
    /// client that was cleaned up can never connect.
    pub fn clean_up(&self) {
        let mut link = self.link.lock();
        link.attempted = true;
        let reader = link.reader.take();
        if link.finish(ConnectionState::Closed) {
            if let Some(reader) = reader {
                reader.abort();
                info!("connection to {} closed", self.config.target());
            }
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.clean_up();
    }
}

fn log_connected(target: &str, server: Option<SocketAddr>) {
    match server {
        Some(addr) => info!("connected to relay at {target} ({addr})"),
        None => info!("connected to relay at {target}"),
    }
}

async fn open(target: String) -> Result<TcpStream, ClientNetworkError> {
    let addrs: Vec<SocketAddr> = lookup_host(target.as_str())
        .await
        .map_err(|source| ClientNetworkError::Resolve {
            target: target.clone(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ClientNetworkError::Resolve {
            target,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    TcpStream::connect(addrs.as_slice())
        .await
        .map_err(|source| ClientNetworkError::ConnectFailed { target, source })
}

async fn receive_loop(
    link: Arc<Mutex<Link>>,
    events: mpsc::Sender<ClientEvent>,
    mut reader: OwnedReadHalf,
) {
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
    let final_event = loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                info!("server closed the connection");
                break link
                    .lock()
                    .finish(ConnectionState::Closed)
                    .then_some(ClientEvent::Disconnected);
            }
            Ok(n) => {
                trace!("received {n} byte(s)");
                if events
                    .send(ClientEvent::Message(decode_ascii(&buffer[..n])))
                    .await
                    .is_err()
                {
                    trace!("event receiver dropped; message discarded");
                }
            }
            Err(e) => {
                warn!("receive failed: {e}");
                break link
                    .lock()
                    .finish(ConnectionState::Faulted)
                    .then(|| ClientEvent::Error(e.to_string()));
            }
        }
    };

    if let Some(event) = final_event {
        let _ = events.send(event).await;
    }
}

async fn write_loop(
    link: Arc<Mutex<Link>>,
    events: mpsc::Sender<ClientEvent>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!("send failed: {e}");
            let torn_down = {
                let mut link = link.lock();
                let reader = link.reader.take();
                let torn_down = link.finish(ConnectionState::Faulted);
                if let (true, Some(reader)) = (torn_down, reader) {
                    reader.abort();
                }
                torn_down
            };
            if torn_down {
                let _ = events.send(ClientEvent::Error(e.to_string())).await;
            }
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!("shutdown after clean-up failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Returns a loopback port nothing is listening on.
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config_for(port: u16) -> ClientConfig {
        ClientConfig {
            port,
            ..ClientConfig::default()
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[test]
    fn test_default_config_targets_local_relay() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.target(), "127.0.0.1:5002");
        assert_eq!(cfg.connect_timeout, None);
    }

    #[test]
    fn test_config_from_profile_converts_timeout() {
        let profile = ConnectionProfile {
            connect_timeout_secs: Some(3),
            ..ConnectionProfile::new("shack", "10.0.0.2", 4532)
        };

        let cfg = ClientConfig::from(&profile);

        assert_eq!(cfg.target(), "10.0.0.2:4532");
        assert_eq!(cfg.connect_timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_new_client_is_connecting_and_rejects_send() {
        let (client, _rx) = RelayClient::new(ClientConfig::default());

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.is_connected());
        assert_eq!(client.send("FA;"), Err(ClientSendError::NotConnected));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_client_faulted() {
        // Arrange
        let (client, _rx) = RelayClient::new(config_for(closed_port()));

        // Act
        let result = client.connect().await;

        // Assert
        assert!(matches!(
            result,
            Err(ClientNetworkError::ConnectFailed { .. })
        ));
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert!(!client.is_connected());
        assert_eq!(client.send("FA;"), Err(ClientSendError::NotConnected));
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let (client, _rx) = RelayClient::new(config_for(closed_port()));
        let _ = client.connect().await;

        let second = client.connect().await;

        assert!(matches!(second, Err(ClientNetworkError::AlreadyAttempted)));
    }

    #[tokio::test]
    async fn test_connect_after_clean_up_is_rejected() {
        let (client, _rx) = RelayClient::new(ClientConfig::default());

        client.clean_up();

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.connect().await,
            Err(ClientNetworkError::AlreadyAttempted)
        ));
    }

    #[tokio::test]
    async fn test_round_trip_with_plain_listener() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, mut rx) = RelayClient::new(config_for(port));

        // Act
        client.connect().await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();
        client.send("ZZFAon1;").unwrap();
        let mut buf = [0u8; 8];
        timeout(WAIT, server_side.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        server_side.write_all(b"RESP1;").await.unwrap();

        // Assert
        assert!(client.is_connected());
        assert_eq!(&buf, b"ZZFAon1;");
        assert_eq!(
            next_event(&mut rx).await,
            ClientEvent::Message("RESP1;".to_string())
        );
    }

    #[tokio::test]
    async fn test_server_close_emits_disconnected() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, mut rx) = RelayClient::new(config_for(port));
        client.connect().await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        // Act
        drop(server_side);

        // Assert
        assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.send("FA;"), Err(ClientSendError::NotConnected));
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn test_write_fault_faults_link_and_reports_error_once() {
        // Arrange: a connected stream whose server side has reset it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        server_side.set_linger(Some(Duration::ZERO)).unwrap();
        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_read_half, write_half) = stream.into_split();

        let idle_reader = tokio::spawn(std::future::pending::<()>());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(Link {
            state: ConnectionState::Connected,
            attempted: true,
            outbound: Some(outbound_tx.clone()),
            reader: Some(idle_reader.abort_handle()),
        }));
        let (events_tx, mut events_rx) = mpsc::channel(8);

        // Act
        outbound_tx.send(b"FA;".to_vec()).unwrap();
        outbound_tx.send(b"MD;".to_vec()).unwrap();
        timeout(
            WAIT,
            write_loop(Arc::clone(&link), events_tx, write_half, outbound_rx),
        )
        .await
        .expect("writer stops on the first failed write");

        // Assert
        assert!(matches!(events_rx.try_recv(), Ok(ClientEvent::Error(_))));
        assert!(events_rx.try_recv().is_err());
        let link = link.lock();
        assert_eq!(link.state, ConnectionState::Faulted);
        assert!(link.outbound.is_none());
        drop(link);
        assert!(idle_reader.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_clean_up_closes_socket_and_is_idempotent() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, _rx) = RelayClient::new(config_for(port));
        client.connect().await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        // Act
        client.clean_up();
        client.clean_up();

        // Assert: the server side reads end-of-stream
        let mut buf = [0u8; 4];
        let n = timeout(WAIT, server_side.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(!client.is_connected());
    }
}
