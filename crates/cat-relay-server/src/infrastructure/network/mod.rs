//! Network infrastructure for the relay server.
//!
//! # Sub-modules
//!
//! - **`server`** – `RelayServer`: binds the listener, accepts peers, assigns
//!   each one an identity in the shared registry, runs its receive and writer
//!   tasks, and offers unicast and broadcast sends plus an idempotent close.

pub mod server;

pub use server::{RelayServer, ServerConfig, ServerError};
