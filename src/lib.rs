//! # pulse-hub
//!
//! Real-time fan-out hub: keeps live WebSocket and Server-Sent-Events
//! connections, routes messages to one user's connections or to everyone,
//! and bridges those messages across instances through a pub/sub broker.
//!
//! Delivery is best-effort and in-memory. A client whose outbound queue is
//! full is disconnected rather than allowed to stall delivery to others.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, SSE)
//!     │
//!     ├── WS Handler + pumps (ws/)
//!     ├── SSE Handler (sse/)
//!     │
//!     ├── Hub (service/) ── dispatch loop ── Broker (broker/)
//!     │                  └─ broker consumer ◄──┘
//!     │
//!     └── ClientRegistry (domain/)
//! ```
//!
//! Locally submitted messages are routed to local clients and then
//! published. Messages arriving from the broker are routed locally only.

pub mod api;
pub mod app_state;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod sse;
pub mod ws;
