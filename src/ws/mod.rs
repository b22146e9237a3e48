//! WebSocket transport: the upgrade handler and the per-connection
//! read/write pumps.
//!
//! The endpoint at `/ws` is bidirectional. Clients receive routed hub
//! messages and may send JSON messages of their own; a `ping` message is
//! answered with `pong`, anything else goes to the hub's inbound handler.

pub mod connection;
pub mod handler;
