//! Domain entities for the CAT relay.
//!
//! This module contains pure logic with no socket or runtime dependencies.
//! Both the server and the client build their network code on top of these
//! types, so the rules below are shared by both ends:
//!
//! - A connection is identified by a non-zero [`connection::ConnectionId`]
//!   assigned by the server, starting at 1.
//! - A connection moves through `Connecting → Connected → (Closed | Faulted)`
//!   and never comes back from a terminal state.
//! - The server keeps its live connections in a [`registry::SlotRegistry`],
//!   where an identity's slot never moves and a removed slot is never reused.

/// Connection identity, lifecycle state and disconnect classification.
pub mod connection;

/// Events emitted by the server and the client to their consumers.
pub mod events;

/// Slot-indexed registry of live connections.
pub mod registry;
