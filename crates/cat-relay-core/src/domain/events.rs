//! Events emitted by the relay to the external command interpreter.
//!
//! Both ends deliver events over a channel instead of invoking callbacks on
//! the transport's task, so a slow consumer never runs on an I/O path and
//! can be tested by simply draining the receiver.

use std::net::SocketAddr;

use crate::domain::connection::{ConnectionId, DisconnectReason};

/// Events produced by the relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A peer was accepted and registered under `identity`.
    ClientConnected {
        identity: ConnectionId,
        peer: SocketAddr,
    },
    /// One completed read from `identity`, decoded as ASCII text.
    ///
    /// The text is forwarded verbatim: it may hold several protocol
    /// commands or only part of one.
    Message { text: String, identity: ConnectionId },
    /// The connection was torn down and its slot tombstoned.
    ClientDisconnected {
        identity: ConnectionId,
        reason: DisconnectReason,
    },
}

impl ServerEvent {
    /// The identity the event refers to.
    pub fn identity(&self) -> ConnectionId {
        match self {
            Self::ClientConnected { identity, .. }
            | Self::Message { identity, .. }
            | Self::ClientDisconnected { identity, .. } => *identity,
        }
    }
}

/// Events produced by the relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// One completed read, decoded as ASCII text.
    Message(String),
    /// The receive loop stopped on a transport error.
    Error(String),
    /// The server closed the connection.
    Disconnected,
}
