//! Shared HTTP API types
//!
//! Request/response bodies of the local inference server. The server
//! deserializes them in its axum handlers; the client serializes them with
//! reqwest. Both sides link this module so the wire format cannot drift.

pub mod types;

pub use types::*;
