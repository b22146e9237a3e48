//! Service layer: the hub coordinator.
//!
//! [`Hub`] owns the connection registry, routes messages to local clients
//! and bridges them to other instances through a [`crate::broker::Broker`].

pub mod hub;
pub mod inbound;

pub use hub::Hub;
pub use inbound::{IgnoreInbound, InboundHandler};
