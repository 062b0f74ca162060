//! # cat-relay-core
//!
//! Shared library for the CAT relay containing connection identity, the
//! slot-indexed client registry, the ASCII text codec, `;` command framing
//! and the TOML configuration schema.
//!
//! This crate is used by both the server and client crates.  Apart from
//! reading and writing the configuration file it has no dependency on
//! sockets or async runtimes.
//!
//! # Architecture overview
//!
//! The relay bridges one controlled radio with any number of peers that talk
//! a textual CAT protocol (`FA00014074000;`, `ZZFAon1;`, ...).  The server
//! accepts peers and tags everything they send with a stable integer
//! identity; the client is the other end of one such connection.
//!
//! - **`domain`** – Connection identity and lifecycle, the registry that
//!   maps identities to connections, and the events both ends emit.
//!
//! - **`protocol`** – How text travels on the wire: a lossy 8-bit ASCII
//!   codec and an opt-in assembler that cuts a byte stream into
//!   `;`-terminated commands.
//!
//! - **`config`** – The on-disk TOML configuration: server settings and
//!   named connection profiles.

pub mod config;
pub mod domain;
pub mod protocol;

pub use config::{ConfigError, ConnectionProfile, RelayConfig, ServerSection};
pub use domain::connection::{
    ConnectionId, ConnectionState, DisconnectReason, SendError, StateError,
};
pub use domain::events::{ClientEvent, ServerEvent};
pub use domain::registry::{IdentityPolicy, RegistryError, SlotRegistry};
pub use protocol::codec::{decode_ascii, encode_ascii};
pub use protocol::framing::{CommandAssembler, FramingError};

/// Default TCP port of the relay.
pub const DEFAULT_PORT: u16 = 5002;

/// Capacity of the per-connection receive buffer.
///
/// Each read fills at most this many bytes; the buffer is reused for every
/// read on the connection and never grows.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;
