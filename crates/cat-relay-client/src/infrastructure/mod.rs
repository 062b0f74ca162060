//! Infrastructure layer for the client application.
//!
//! **Dependency rule**: this layer may depend on `cat_relay_core` only.
//!
//! # Sub-modules
//!
//! - **`network`** – `RelayClient`: one TCP connection to the relay server,
//!   its receive and writer tasks, and the synchronous send and clean-up
//!   operations.

pub mod network;
