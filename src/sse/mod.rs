//! Server-Sent Events transport.
//!
//! An SSE connection is registered with the hub as an ordinary client, so
//! per-user and global routing, backpressure eviction and shutdown all
//! behave exactly as for WebSocket connections. There is no read side:
//! the only inbound signal is the client going away.

pub mod handler;
