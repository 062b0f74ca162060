//! Application layer use cases for the relay server.
//!
//! Use cases in this layer orchestrate domain objects from `cat_relay_core`
//! and depend on abstractions (traits) rather than on sockets, so they can
//! be unit-tested without a network.
//!
//! # Sub-modules
//!
//! - **`dispatch_commands`** – Assembles each peer's raw messages into
//!   `;`-terminated commands, hands them to a [`CommandInterpreter`] and
//!   routes the answers back to the issuing peer through a [`ReplySink`].
//!
//! [`CommandInterpreter`]: dispatch_commands::CommandInterpreter
//! [`ReplySink`]: dispatch_commands::ReplySink

pub mod dispatch_commands;
