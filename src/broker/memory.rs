//! In-process broker backed by [`tokio::sync::broadcast`] channels.
//!
//! [`MemoryBroker`] keeps one broadcast channel per topic. Hubs sharing a
//! `MemoryBroker` behave like separate processes sharing a real broker,
//! which makes it the default for single-process deployments and the
//! broker used throughout the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use super::{Broker, PayloadStream};
use crate::error::BrokerError;

/// Default per-topic channel capacity.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Broadcast-channel broker living inside this process.
///
/// When a subscriber falls more than `capacity` payloads behind, the
/// oldest are dropped for it and a warning is logged.
#[derive(Debug)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
    published: AtomicU64,
}

impl MemoryBroker {
    /// Creates a broker whose topics buffer `capacity` payloads.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
        }
    }

    /// Total number of successful `publish` calls across all topics.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Current number of subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        // Counted before sending so a subscriber that sees the payload also
        // sees the count.
        self.published.fetch_add(1, Ordering::SeqCst);
        // No subscribers is not an error: the payload is simply not seen.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BrokerError> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = futures_util::stream::unfold(rx, move |mut rx| {
            let topic = topic.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%topic, skipped, "broker subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_still_counts() {
        let broker = MemoryBroker::default();
        let result = broker.publish("t", "x".to_string()).await;
        assert!(result.is_ok());
        assert_eq!(broker.publish_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_payload() {
        let broker = MemoryBroker::default();
        let Ok(mut stream) = broker.subscribe("t").await else {
            panic!("subscribe failed");
        };
        let _ = broker.publish("t", "hello".to_string()).await;

        assert_eq!(stream.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = MemoryBroker::default();
        let Ok(mut a) = broker.subscribe("a").await else {
            panic!("subscribe failed");
        };
        let _ = broker.publish("b", "for-b".to_string()).await;
        let _ = broker.publish("a", "for-a".to_string()).await;

        assert_eq!(a.next().await.as_deref(), Some("for-a"));
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let broker = MemoryBroker::default();
        let Ok(mut one) = broker.subscribe("t").await else {
            panic!("subscribe failed");
        };
        let Ok(mut two) = broker.subscribe("t").await else {
            panic!("subscribe failed");
        };
        assert_eq!(broker.subscriber_count("t"), 2);

        let _ = broker.publish("t", "p".to_string()).await;
        assert_eq!(one.next().await.as_deref(), Some("p"));
        assert_eq!(two.next().await.as_deref(), Some("p"));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let broker = MemoryBroker::new(2);
        let Ok(mut stream) = broker.subscribe("t").await else {
            panic!("subscribe failed");
        };
        for i in 0..5 {
            let _ = broker.publish("t", i.to_string()).await;
        }
        assert_eq!(stream.next().await.as_deref(), Some("3"));
        assert_eq!(stream.next().await.as_deref(), Some("4"));
    }
}
