//! Live connection set plus per-user presence index.
//!
//! [`ClientRegistry`] keeps both structures behind one
//! [`tokio::sync::RwLock`]. Registration and unregistration take the
//! exclusive lock and update both maps together; routing takes the shared
//! lock. Nothing outside this module touches the maps.
//!
//! # Concurrency
//!
//! - Any number of routing passes may run concurrently.
//! - A client whose registration has returned is visible to the next
//!   routing pass; one whose unregistration has returned is not.
//! - Delivery under the shared lock never blocks: frames are offered with
//!   [`Client::try_enqueue`]. Clients that refuse are reported back to the
//!   caller for eviction, which happens after the shared lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, TryLockError};

use super::{Client, ConnectionId, Frame, UserId};
use crate::error::HubError;

#[derive(Debug, Default)]
struct RegistryState {
    clients: HashMap<ConnectionId, Arc<Client>>,
    by_user: HashMap<UserId, Vec<Arc<Client>>>,
    closed: bool,
}

/// Result of offering one frame to a set of clients.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Number of clients that accepted the frame.
    pub delivered: usize,
    /// Clients whose queue was full or closed.
    pub rejected: Vec<Arc<Client>>,
}

/// Registry of every live connection in this process.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    state: RwLock<RegistryState>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client to the live set and to its user's presence entry.
    ///
    /// Returns the number of live connections after the insert.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] once [`ClientRegistry::drain`] has run.
    pub async fn insert(&self, client: Arc<Client>) -> Result<usize, HubError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(HubError::Closed);
        }
        state
            .by_user
            .entry(client.user_id())
            .or_default()
            .push(Arc::clone(&client));
        state.clients.insert(client.id(), client);
        Ok(state.clients.len())
    }

    /// Removes a client from both structures and closes its outbound queue.
    ///
    /// Returns the remaining connection count, or `None` if the client was
    /// not registered (a repeated removal is a no-op).
    pub async fn remove(&self, client: &Client) -> Option<usize> {
        let mut state = self.state.write().await;
        Self::remove_locked(&mut state, client)
    }

    /// Like [`ClientRegistry::remove`], without waiting. Usable outside an
    /// async context.
    ///
    /// # Errors
    ///
    /// Returns [`TryLockError`] if the lock is currently held.
    pub fn try_remove(&self, client: &Client) -> Result<Option<usize>, TryLockError> {
        let mut state = self.state.try_write()?;
        Ok(Self::remove_locked(&mut state, client))
    }

    fn remove_locked(state: &mut RegistryState, client: &Client) -> Option<usize> {
        let removed = state.clients.remove(&client.id())?;
        removed.close();

        let user_id = removed.user_id();
        if let Some(entries) = state.by_user.get_mut(&user_id) {
            entries.retain(|c| c.id() != removed.id());
            if entries.is_empty() {
                state.by_user.remove(&user_id);
            }
        }
        Some(state.clients.len())
    }

    /// Offers `frame` to every client of `target`, or to every client when
    /// `target` is `None`.
    pub async fn deliver(&self, target: Option<UserId>, frame: &Frame) -> Delivery {
        let state = self.state.read().await;
        let mut delivery = Delivery::default();

        let mut offer = |client: &Arc<Client>| match client.try_enqueue(frame.clone()) {
            Ok(()) => delivery.delivered += 1,
            Err(_) => delivery.rejected.push(Arc::clone(client)),
        };

        match target {
            Some(user_id) => {
                if let Some(entries) = state.by_user.get(&user_id) {
                    entries.iter().for_each(&mut offer);
                }
            }
            None => state.clients.values().for_each(&mut offer),
        }

        delivery
    }

    /// Refuses all future inserts, empties the registry and closes every
    /// client's queue. Returns the clients that were removed.
    pub async fn drain(&self) -> Vec<Arc<Client>> {
        let mut state = self.state.write().await;
        state.closed = true;
        state.by_user.clear();
        let drained: Vec<Arc<Client>> = state.clients.drain().map(|(_, c)| c).collect();
        for client in &drained {
            client.close();
        }
        drained
    }

    /// Returns `true` if the client is currently registered.
    pub async fn contains(&self, client: &Client) -> bool {
        self.state.read().await.clients.contains_key(&client.id())
    }

    /// Returns `true` if the client is listed under its user in the
    /// presence index.
    pub async fn is_indexed(&self, client: &Client) -> bool {
        self.state
            .read()
            .await
            .by_user
            .get(&client.user_id())
            .is_some_and(|entries| entries.iter().any(|c| c.id() == client.id()))
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.state.read().await.clients.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.clients.is_empty()
    }

    /// Number of distinct users with at least one connection.
    pub async fn user_count(&self) -> usize {
        self.state.read().await.by_user.len()
    }

    /// Number of connections held by `user_id`.
    pub async fn connections_for(&self, user_id: UserId) -> usize {
        self.state
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Message, Transport};

    fn frame() -> Frame {
        let Ok(frame) = Frame::encode(&Message::new("test", None, Default::default())) else {
            panic!("encode failed");
        };
        frame
    }

    #[tokio::test]
    async fn insert_indexes_both_structures() {
        let registry = ClientRegistry::new();
        let (client, _rx) = Client::new(UserId::random(), Transport::WebSocket, 8);

        let Ok(total) = registry.insert(Arc::clone(&client)).await else {
            panic!("insert failed");
        };
        assert_eq!(total, 1);
        assert!(registry.contains(&client).await);
        assert!(registry.is_indexed(&client).await);
        assert_eq!(registry.user_count().await, 1);
    }

    #[tokio::test]
    async fn remove_clears_both_and_is_idempotent() {
        let registry = ClientRegistry::new();
        let (client, _rx) = Client::new(UserId::random(), Transport::WebSocket, 8);
        let _ = registry.insert(Arc::clone(&client)).await;

        assert_eq!(registry.remove(&client).await, Some(0));
        assert!(!registry.contains(&client).await);
        assert!(!registry.is_indexed(&client).await);
        assert_eq!(registry.user_count().await, 0);
        assert!(client.is_closed());

        assert_eq!(registry.remove(&client).await, None);
    }

    #[tokio::test]
    async fn multi_device_user_keeps_remaining_connections() {
        let registry = ClientRegistry::new();
        let user = UserId::random();
        let (phone, _rx1) = Client::new(user, Transport::WebSocket, 8);
        let (laptop, _rx2) = Client::new(user, Transport::Sse, 8);
        let _ = registry.insert(Arc::clone(&phone)).await;
        let _ = registry.insert(Arc::clone(&laptop)).await;
        assert_eq!(registry.connections_for(user).await, 2);

        let _ = registry.remove(&phone).await;
        assert_eq!(registry.connections_for(user).await, 1);
        assert!(registry.is_indexed(&laptop).await);
        assert_eq!(registry.user_count().await, 1);
    }

    #[tokio::test]
    async fn deliver_targets_only_the_user() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = Client::new(UserId::random(), Transport::WebSocket, 8);
        let (b, mut rx_b) = Client::new(UserId::random(), Transport::WebSocket, 8);
        let _ = registry.insert(Arc::clone(&a)).await;
        let _ = registry.insert(Arc::clone(&b)).await;

        let delivery = registry.deliver(Some(a.user_id()), &frame()).await;
        assert_eq!(delivery.delivered, 1);
        assert!(delivery.rejected.is_empty());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        let delivery = registry.deliver(None, &frame()).await;
        assert_eq!(delivery.delivered, 2);
    }

    #[tokio::test]
    async fn deliver_reports_full_queues() {
        let registry = ClientRegistry::new();
        let (slow, _rx) = Client::new(UserId::random(), Transport::WebSocket, 1);
        let _ = registry.insert(Arc::clone(&slow)).await;

        let first = registry.deliver(None, &frame()).await;
        assert_eq!(first.delivered, 1);

        let second = registry.deliver(None, &frame()).await;
        assert_eq!(second.delivered, 0);
        assert_eq!(second.rejected.len(), 1);
    }

    #[test]
    fn try_remove_works_without_a_runtime() {
        let registry = ClientRegistry::new();
        let (client, _rx) = Client::new(UserId::random(), Transport::Sse, 8);
        assert!(tokio_test::block_on(registry.insert(Arc::clone(&client))).is_ok());

        assert!(matches!(registry.try_remove(&client), Ok(Some(0))));
        assert!(client.is_closed());
        assert!(!tokio_test::block_on(registry.is_indexed(&client)));
        assert!(matches!(registry.try_remove(&client), Ok(None)));
    }

    #[tokio::test]
    async fn try_remove_reports_a_held_lock() {
        let registry = ClientRegistry::new();
        let (client, _rx) = Client::new(UserId::random(), Transport::Sse, 8);
        let _ = registry.insert(Arc::clone(&client)).await;

        let reader = registry.state.read().await;
        assert!(registry.try_remove(&client).is_err());
        drop(reader);
        assert!(matches!(registry.try_remove(&client), Ok(Some(0))));
    }

    #[tokio::test]
    async fn drain_closes_everything_and_refuses_inserts() {
        let registry = ClientRegistry::new();
        let (client, mut rx) = Client::new(UserId::random(), Transport::WebSocket, 8);
        let _ = registry.insert(Arc::clone(&client)).await;

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty().await);
        assert!(rx.recv().await.is_none());

        let (late, _rx) = Client::new(UserId::random(), Transport::WebSocket, 8);
        assert!(matches!(registry.insert(late).await, Err(HubError::Closed)));
    }
}
