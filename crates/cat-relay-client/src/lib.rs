//! cat-relay-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the client do?
//!
//! The client is the peer end of one relay connection.  It:
//!
//! 1. Resolves the server address and makes a single connect attempt.
//! 2. Forwards every read from the server as a `ClientEvent::Message`.
//! 3. Sends text to the server without waiting for the socket.
//! 4. Reports a server-side close as `ClientEvent::Disconnected` and a
//!    transport error as `ClientEvent::Error`.  It never reconnects.

/// Infrastructure layer: the TCP connection to the relay server.
pub mod infrastructure;

pub use infrastructure::network::{
    ClientConfig, ClientNetworkError, ClientSendError, RelayClient,
};
