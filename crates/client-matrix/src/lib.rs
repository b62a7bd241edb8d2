//! Matrix client-server API runtime: HTTP transport, the background sync
//! engine, and the request wrappers built on top of them.

/// Session-bound request wrappers.
pub mod client;
/// Long-poll loop and listener fan-out.
pub mod engine;
mod paths;
/// Transport seam and the `reqwest` implementation.
pub mod transport;

pub use client::Client;
pub use engine::SyncEngine;
pub use transport::{ApiRequest, HttpTransport, RequestBody, Transport, TransportError};
