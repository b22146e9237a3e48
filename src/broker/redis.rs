//! Redis PUBLISH/SUBSCRIBE broker.
//!
//! Publishing goes through one multiplexed connection shared by every
//! caller. Each subscription opens its own pub/sub connection, as Redis
//! requires.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{Broker, PayloadStream};
use crate::error::BrokerError;

/// Broker backed by a Redis server.
pub struct RedisBroker {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] if the URL is invalid or the server
    /// is unreachable.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url).map_err(|e| BrokerError::Publish(e.to_string()))?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        tracing::info!(addr = ?client.get_connection_info().addr, "connected to redis broker");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, i64>(topic, payload)
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping non-utf8 redis payload");
                        None
                    }
                }
            });
        Ok(stream.boxed())
    }
}
