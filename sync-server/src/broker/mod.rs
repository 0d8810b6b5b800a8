//! Pub/sub broker abstraction.
//!
//! The broker fans a published payload out to every server process that
//! subscribed to the channel. A process subscribes once per channel no
//! matter how many of its connections joined (see
//! [`crate::router::ChannelRouter`]), and receives deliveries and
//! subscription notices through a single event stream.
//!
//! [`LocalBroker`] is the in-process implementation. Brokers attached to
//! the same [`BrokerHub`] see each other's publishes, which is how several
//! servers share channels inside one process. [`RedisBroker`] fans out
//! through Redis PUBLISH/SUBSCRIBE, so servers in separate processes or on
//! separate hosts share channels.

mod local;
mod redis;

pub use self::local::{BrokerHub, LocalBroker};
pub use self::redis::RedisBroker;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BrokerResult;

/// Something the broker tells its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A payload published on a subscribed channel.
    Message {
        /// Channel the payload was published on.
        channel: String,
        /// Serialized packet.
        payload: String,
    },
    /// This subscriber started listening on `channel`.
    Subscribed {
        /// Channel.
        channel: String,
        /// Channels this subscriber now listens on.
        count: usize,
    },
    /// This subscriber stopped listening on `channel`.
    Unsubscribed {
        /// Channel.
        channel: String,
        /// Channels this subscriber still listens on.
        count: usize,
    },
}

/// Trait for pub/sub brokers.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` on `channel`.
    ///
    /// Returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, payload: &str) -> BrokerResult<usize>;

    /// Start receiving messages for `channel`. Idempotent.
    async fn subscribe(&self, channel: &str) -> BrokerResult<()>;

    /// Stop receiving messages for `channel`. Idempotent.
    async fn unsubscribe(&self, channel: &str) -> BrokerResult<()>;

    /// A new receiver for this subscriber's events.
    ///
    /// Only events sent after the call are observed.
    fn events(&self) -> broadcast::Receiver<BrokerEvent>;
}
