//! One live connection as seen by the hub.
//!
//! A [`Client`] pairs an identity with the sending half of a bounded
//! outbound queue. The receiving half is handed to whatever drives the
//! transport (the WebSocket write pump or the SSE stream). The hub only
//! ever holds `Arc<Client>` references in its registry.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{ConnectionId, Frame, UserId};

/// Transport a client is connected over. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Bidirectional WebSocket.
    WebSocket,
    /// Server-Sent Events stream.
    Sse,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => f.write_str("websocket"),
            Self::Sse => f.write_str("sse"),
        }
    }
}

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The outbound queue was closed by unregistration.
    #[error("outbound queue closed")]
    Closed,
}

/// A registered connection.
#[derive(Debug)]
pub struct Client {
    id: ConnectionId,
    user_id: UserId,
    transport: Transport,
    /// `None` once the queue has been closed.
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Client {
    /// Creates a client with an outbound queue of `capacity` frames and
    /// returns the receiving half of that queue.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(
        user_id: UserId,
        transport: Transport,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let client = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            transport,
            outbound: Mutex::new(Some(tx)),
        });
        (client, rx)
    }

    /// Process-local connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Authenticated owner of the connection.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Transport this client is connected over.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] if the client was already unregistered.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Closes the outbound queue. Frames already queued are still
    /// delivered to the receiver, after which it yields `None`.
    ///
    /// Returns `true` if this call did the closing.
    pub fn close(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Returns `true` once [`Client::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
