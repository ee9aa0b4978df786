//! Network relay client (spec.md §4.4): the one asynchronous facility that
//! lets guest user processes reach a real TCP endpoint, by multiplexing
//! logical connections over a single `WebSocket` to a relay server.

pub mod client;
pub mod protocol;
pub mod state;

pub use client::{RelayClient, RelayConfig};
pub use protocol::Frame;
pub use state::{ConnectionTable, RejectedOpen, RelayError};
