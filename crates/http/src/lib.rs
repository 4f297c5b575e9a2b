//! HTTP surface of the stream job subsystem.
//!
//! Serves the master API and health endpoint, and provides reqwest clients
//! for the data-service job store and for the master API itself.

pub mod api;
pub mod client;
pub mod server;
pub mod store;

/// Base path of the master API.
pub const API_PREFIX: &str = "/stream/v1";
