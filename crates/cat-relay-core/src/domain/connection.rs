//! Connection identity and lifecycle.
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting ──► Connected ──► Closed
//!     │            │  ▲
//!     │            └──┘ (successful receive, re-armed)
//!     │            │
//!     └────────────┴────► Faulted
//! ```
//!
//! `Closed` and `Faulted` are terminal.  A new TCP handshake always produces
//! a new connection object (and, on the server, a new identity).

use std::fmt;
use std::io;
use std::num::NonZeroU32;

use thiserror::Error;

/// Server-assigned identity of a connection.
///
/// Identities start at 1 and are handed out sequentially by the registry.
/// Zero cannot be represented, so an event carrying a `ConnectionId` always
/// refers to a real slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(NonZeroU32);

impl ConnectionId {
    /// Returns `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The raw integer value (always ≥ 1).
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl From<NonZeroU32> for ConnectionId {
    fn from(raw: NonZeroU32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Error returned by [`ConnectionState::transition`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid connection state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Why a server-side send was not queued.
///
/// A failed send never tears anything down; callers that follow the
/// fire-and-forget contract may simply drop the result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No live connection holds this identity (never issued or torn down).
    #[error("no live connection with identity {0}")]
    UnknownIdentity(ConnectionId),
    /// The connection is still registered but its writer has stopped.
    #[error("connection {0} is closing")]
    ConnectionClosed(ConnectionId),
    /// The server has been closed.
    #[error("server is closed")]
    ServerClosed,
}

/// Lifecycle state of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport opened, handshake not finished yet.
    Connecting,
    /// Handshake done; the receive loop is armed.
    Connected,
    /// Closed locally or by an orderly peer disconnect.
    Closed,
    /// Torn down by a transport error or a failed connect.
    Faulted,
}

impl ConnectionState {
    /// Returns `true` for `Closed` and `Faulted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }

    /// Validates a move to `next` and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] when leaving a terminal
    /// state or when going back to `Connecting`.
    pub fn transition(self, next: ConnectionState) -> Result<ConnectionState, StateError> {
        if self.is_terminal() || next == ConnectionState::Connecting {
            return Err(StateError::InvalidTransition {
                from: self,
                to: next,
            });
        }
        Ok(next)
    }
}

/// Why a connection left the `Connected` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer reset the connection (orderly disconnect).
    ConnectionReset,
    /// The connection was aborted by the local stack (orderly disconnect).
    ConnectionAborted,
    /// The peer shut down its side; a read returned zero bytes.
    PeerClosed,
    /// Closed by this process (`close` / `clean_up`).
    LocalClose,
    /// Any other transport error; the connection was closed explicitly.
    Fault(String),
}

impl DisconnectReason {
    /// Classifies a receive or send error.
    ///
    /// Reset and abort are what a peer dropping its socket normally looks
    /// like; everything else is treated as an unexpected fault.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            _ => Self::Fault(err.to_string()),
        }
    }

    /// Returns `false` only for [`DisconnectReason::Fault`].
    pub fn is_orderly(&self) -> bool {
        !matches!(self, Self::Fault(_))
    }

    /// The terminal state a connection ends in for this reason.
    pub fn terminal_state(&self) -> ConnectionState {
        if self.is_orderly() {
            ConnectionState::Closed
        } else {
            ConnectionState::Faulted
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionReset => f.write_str("connection reset by peer"),
            Self::ConnectionAborted => f.write_str("connection aborted"),
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::LocalClose => f.write_str("closed locally"),
            Self::Fault(detail) => write!(f, "transport fault: {detail}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
