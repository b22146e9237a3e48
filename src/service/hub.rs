//! The hub: connection registry owner, router and broker driver.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::inbound::{IgnoreInbound, InboundHandler};
use crate::broker::{Broker, PayloadStream};
use crate::config::HubConfig;
use crate::domain::{
    Client, ClientRegistry, Frame, HubEvent, InstanceId, Message, Payload, Transport, UserId,
};
use crate::error::HubError;

/// Process-wide real-time fan-out coordinator.
///
/// Cheap to clone; every clone drives the same registry and tasks.
///
/// # Tasks
///
/// [`Hub::start`] spawns three long-lived tasks:
///
/// - the dispatch loop, which takes messages submitted through
///   [`Hub::send_to_user`] / [`Hub::send_to_all`], routes them to local
///   clients and then hands them to the publisher;
/// - the publisher, which forwards those messages to the broker with a
///   deadline per publish. Its queue is bounded and overflow is dropped,
///   so a slow or hung broker never holds up local delivery;
/// - the broker consumer, which feeds every payload on the hub topic into
///   [`Hub::receive_from_broker`]. That path routes locally and never
///   publishes, so instances cannot bounce a message between each other.
///
/// All registry access goes through [`ClientRegistry`]'s
/// lock; no task owns the registry. The tasks only hold weak references
/// to the hub, so dropping every `Hub` handle stops them even without
/// [`Hub::shutdown`].
#[derive(Debug, Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

#[derive(Debug)]
struct HubInner {
    instance: InstanceId,
    config: HubConfig,
    registry: ClientRegistry,
    inbound: Arc<dyn InboundHandler>,
    dispatch_tx: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Starts a hub that ignores inbound application messages.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(config: HubConfig, broker: Arc<dyn Broker>) -> Self {
        Self::start_with_inbound(config, broker, Arc::new(IgnoreInbound)).await
    }

    /// Starts a hub that forwards inbound application messages to
    /// `inbound`.
    ///
    /// The broker subscription is established before this returns. If it
    /// fails the hub runs in local-only mode.
    pub async fn start_with_inbound(
        config: HubConfig,
        broker: Arc<dyn Broker>,
        inbound: Arc<dyn InboundHandler>,
    ) -> Self {
        let config = config.normalized();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_capacity);
        let (publish_tx, publish_rx) = mpsc::channel(config.dispatch_capacity);
        let (shutdown, _) = watch::channel(false);

        let subscription = match broker.subscribe(&config.topic).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    topic = %config.topic,
                    "broker subscribe failed; cross-process delivery disabled"
                );
                None
            }
        };

        let publisher = Publisher {
            broker,
            topic: config.topic.clone(),
            deadline: config.broker_publish_timeout,
        };

        let hub = Self {
            inner: Arc::new(HubInner {
                instance: InstanceId::new(),
                config,
                registry: ClientRegistry::new(),
                inbound,
                dispatch_tx,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let weak = Arc::downgrade(&hub.inner);
        let mut tasks = vec![
            tokio::spawn(run_dispatch(
                Weak::clone(&weak),
                dispatch_rx,
                publish_tx,
                hub.inner.shutdown.subscribe(),
            )),
            tokio::spawn(publisher.run(publish_rx, hub.inner.shutdown.subscribe())),
        ];
        if let Some(stream) = subscription {
            tasks.push(tokio::spawn(run_broker_consumer(
                weak,
                stream,
                hub.inner.shutdown.subscribe(),
            )));
        }
        *hub.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks;

        tracing::info!(
            instance = %hub.inner.instance,
            topic = %hub.inner.config.topic,
            "hub started"
        );
        hub
    }

    /// The configuration this hub runs with.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Identity stamped on this instance's broker traffic.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance
    }

    /// Handler for inbound application messages.
    #[must_use]
    pub fn inbound(&self) -> &dyn InboundHandler {
        self.inner.inbound.as_ref()
    }

    /// Returns `true` once [`Hub::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Adds a client to the live set and the presence index.
    ///
    /// Each client must be registered at most once.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn register(&self, client: Arc<Client>) -> Result<(), HubError> {
        let user_id = client.user_id();
        let connection_id = client.id();
        let transport = client.transport();
        let total = self.inner.registry.insert(client).await?;
        tracing::info!(%user_id, %connection_id, %transport, total, "client registered");
        Ok(())
    }

    /// Removes a client from the registry and closes its outbound queue.
    ///
    /// Returns `false` if the client was not registered; calling this more
    /// than once is harmless.
    pub async fn unregister(&self, client: &Client) -> bool {
        match self.inner.registry.remove(client).await {
            Some(total) => {
                tracing::info!(
                    user_id = %client.user_id(),
                    connection_id = %client.id(),
                    transport = %client.transport(),
                    total,
                    "client unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Non-blocking [`Hub::unregister`] for callers without a runtime.
    ///
    /// Returns `false` if the client was not registered or the registry
    /// lock was busy. In the busy case the client's queue is still closed,
    /// so the next routing pass evicts it.
    pub fn try_unregister(&self, client: &Client) -> bool {
        match self.inner.registry.try_remove(client) {
            Ok(Some(total)) => {
                tracing::info!(
                    user_id = %client.user_id(),
                    connection_id = %client.id(),
                    transport = %client.transport(),
                    total,
                    "client unregistered"
                );
                true
            }
            Ok(None) => false,
            Err(_) => {
                client.close();
                false
            }
        }
    }

    /// Creates a client for `user_id` with the configured queue size and
    /// registers it. Returns the client and the receiving end of its
    /// outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn connect(
        &self,
        user_id: UserId,
        transport: Transport,
    ) -> Result<(Arc<Client>, mpsc::Receiver<Frame>), HubError> {
        let (client, outbound) =
            Client::new(user_id, transport, self.inner.config.client_send_buffer);
        self.register(Arc::clone(&client)).await?;
        Ok((client, outbound))
    }

    /// Returns `true` if the client is in both the live set and its user's
    /// presence entry.
    pub async fn is_registered(&self, client: &Client) -> bool {
        self.inner.registry.contains(client).await && self.inner.registry.is_indexed(client).await
    }

    /// Number of live connections in this process.
    pub async fn connection_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Number of distinct users connected to this process.
    pub async fn user_count(&self) -> usize {
        self.inner.registry.user_count().await
    }

    /// Number of connections `user_id` holds on this process.
    pub async fn user_connection_count(&self, user_id: UserId) -> usize {
        self.inner.registry.connections_for(user_id).await
    }

    /// Sends a message to every connection of `user_id`, here and on every
    /// other instance.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn send_to_user(
        &self,
        user_id: UserId,
        kind: impl Into<String>,
        data: Payload,
    ) -> Result<(), HubError> {
        self.submit(Message::new(kind, Some(user_id), data)).await
    }

    /// Sends a message to every connection on every instance.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] after shutdown.
    pub async fn send_to_all(&self, kind: impl Into<String>, data: Payload) -> Result<(), HubError> {
        self.submit(Message::new(kind, None, data)).await
    }

    /// Sends a typed event to `target`, or to everyone when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Serialization`] if the event cannot be encoded
    /// and [`HubError::Closed`] after shutdown.
    pub async fn send_event(&self, target: Option<UserId>, event: HubEvent) -> Result<(), HubError> {
        let (kind, data) = event.into_parts()?;
        self.submit(Message::new(kind.as_str(), target, data)).await
    }

    async fn submit(&self, message: Message) -> Result<(), HubError> {
        if self.is_shutting_down() {
            return Err(HubError::Closed);
        }
        self.inner
            .dispatch_tx
            .send(message)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Delivers a message received from the broker to local clients only.
    ///
    /// Never publishes. Messages this instance published itself are
    /// skipped, since the dispatch loop already delivered them locally.
    /// Returns the number of local clients that accepted the message.
    pub async fn receive_from_broker(&self, mut message: Message) -> usize {
        if message.origin == Some(self.inner.instance) {
            tracing::trace!(kind = %message.kind, "skipping own broker echo");
            return 0;
        }
        message.origin = None;
        self.route(&message).await
    }

    /// Offers the message to every matching local client and evicts the
    /// ones that cannot keep up.
    async fn route(&self, message: &Message) -> usize {
        let frame = match Frame::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, kind = %message.kind, "dropping unserializable message");
                return 0;
            }
        };

        let delivery = self.inner.registry.deliver(message.target(), &frame).await;
        for client in &delivery.rejected {
            tracing::warn!(
                user_id = %client.user_id(),
                connection_id = %client.id(),
                transport = %client.transport(),
                "outbound queue full or closed; disconnecting client"
            );
            self.unregister(client).await;
        }

        tracing::trace!(
            kind = %message.kind,
            delivered = delivery.delivered,
            evicted = delivery.rejected.len(),
            "message routed"
        );
        delivery.delivered
    }

    /// Stamps this instance as the origin and queues the message for the
    /// publisher. Drops it with a warning when the publisher is behind.
    fn queue_publish(&self, mut message: Message, publish_tx: &mpsc::Sender<String>) {
        message.origin = Some(self.inner.instance);
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, kind = %message.kind, "dropping unserializable broker message");
                return;
            }
        };
        match publish_tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    kind = %message.kind,
                    "broker publish queue full; delivered locally only"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(kind = %message.kind, "publisher stopped; delivered locally only");
            }
        }
    }

    /// Stops the hub.
    ///
    /// New registrations and sends fail with [`HubError::Closed`] from the
    /// moment this is called. Every client is unregistered, which closes
    /// its queue and lets its transport shut down. Waits for the hub's own
    /// tasks to finish. Calling it again does nothing.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        let drained = self.inner.registry.drain().await;
        tracing::info!(closed = drained.len(), "hub shutting down");

        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "hub task failed");
            }
        }
        tracing::info!("hub stopped");
    }
}

async fn run_dispatch(
    hub: Weak<HubInner>,
    mut rx: mpsc::Receiver<Message>,
    publish_tx: mpsc::Sender<String>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };
        let Some(inner) = hub.upgrade() else {
            break;
        };
        let hub = Hub { inner };
        hub.route(&message).await;
        hub.queue_publish(message, &publish_tx);
    }
    tracing::debug!("hub dispatch loop stopped");
}

async fn run_broker_consumer(
    hub: Weak<HubInner>,
    mut stream: PayloadStream,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = stream.next() => match next {
                Some(payload) => payload,
                None => {
                    tracing::warn!("broker subscription ended; cross-process delivery disabled");
                    break;
                }
            },
        };
        let message = match serde_json::from_str::<Message>(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed broker payload");
                continue;
            }
        };
        let Some(inner) = hub.upgrade() else {
            break;
        };
        Hub { inner }.receive_from_broker(message).await;
    }
    tracing::debug!("hub broker consumer stopped");
}

/// Forwards queued payloads to the broker, one at a time, each bounded by
/// `deadline`.
#[derive(Debug)]
struct Publisher {
    broker: Arc<dyn Broker>,
    topic: String,
    deadline: Duration,
}

impl Publisher {
    async fn run(self, mut rx: mpsc::Receiver<String>, mut stop: watch::Receiver<bool>) {
        loop {
            let payload = tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };
            let publish = tokio::time::timeout(self.deadline, self.broker.publish(&self.topic, payload));
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                result = publish => match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "broker publish failed; delivered locally only");
                    }
                    Err(_) => {
                        tracing::warn!(
                            deadline_ms = self.deadline.as_millis(),
                            "broker publish timed out; delivered locally only"
                        );
                    }
                },
            }
        }
        tracing::debug!("hub publisher stopped");
    }
}
