//! Infrastructure layer for the relay server.
//!
//! Contains the OS-facing adapters: the TCP listener, per-connection tasks
//! and the shared client registry.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `cat_relay_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
