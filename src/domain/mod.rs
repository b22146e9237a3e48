//! Domain layer: identifiers, the message envelope, clients and the
//! connection registry.
//!
//! Nothing here knows about HTTP, WebSocket framing or the broker; the
//! transports in [`crate::ws`] and [`crate::sse`] and the coordinator in
//! [`crate::service`] are built on top of these types.

pub mod client;
pub mod client_registry;
pub mod ids;
pub mod message;

pub use client::{Client, EnqueueError, Transport};
pub use client_registry::{ClientRegistry, Delivery};
pub use ids::{ConnectionId, InstanceId, UserId};
pub use message::{EventKind, Frame, HubEvent, Message, Payload};
