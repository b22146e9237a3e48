//! Broker bridge: the publish/subscribe capability that carries hub
//! traffic between processes.
//!
//! The hub depends only on the [`Broker`] trait. Payloads are the JSON
//! encoding of [`crate::domain::Message`]; the broker never inspects them
//! and never decides routing. One topic carries all hub traffic.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::BrokerError;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

/// Stream of raw payloads received on a subscribed topic. Ends when the
/// subscription is lost.
pub type PayloadStream = BoxStream<'static, String>;

/// Publish/subscribe primitive shared by every hub instance.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug {
    /// Publishes one payload to `topic`.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the payload could not be handed to the
    /// broker.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;

    /// Subscribes to `topic`. Every payload published after this call
    /// returns, by any instance, is yielded by the stream.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the subscription could not be set up.
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, BrokerError>;
}
