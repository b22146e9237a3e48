//! Hook for application messages arriving from clients.

use std::fmt;

use crate::domain::{Message, UserId};

/// Receives every inbound client message that is not a keepalive ping.
///
/// Called from the connection's read pump, so implementations must not
/// block; hand long work off to a task.
pub trait InboundHandler: Send + Sync + fmt::Debug {
    /// Handles one message sent by `user_id`.
    fn handle(&self, user_id: UserId, message: Message);
}

/// Default handler: logs and discards.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreInbound;

impl InboundHandler for IgnoreInbound {
    fn handle(&self, user_id: UserId, message: Message) {
        tracing::debug!(%user_id, kind = %message.kind, "ignoring inbound client message");
    }
}
